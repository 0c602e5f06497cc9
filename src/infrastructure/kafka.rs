use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio::runtime::Runtime;

use crate::config::KafkaSettings;
use crate::domain::errors::PublishError;
use crate::domain::ports::{BusMessage, EventBus};

/// Kafka-backed [`EventBus`].
///
/// `publish` is called from the relay thread, outside any async context, so
/// the bus keeps a small runtime of its own to await delivery reports on.
pub struct KafkaEventBus {
    producer: FutureProducer,
    runtime: Runtime,
}

fn producer_config(settings: &KafkaSettings, publish_timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.brokers);
    config.set("client.id", &settings.client_id);
    config.set("acks", "all");
    config.set("enable.idempotence", "true");
    config.set("message.timeout.ms", publish_timeout.as_millis().to_string());
    config
}

fn classify(error: KafkaError, timeout: Duration) -> PublishError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut) => PublishError::Timeout(timeout),
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::QueueFull,
        ) => PublishError::Unavailable(error.to_string()),
        _ => PublishError::Rejected(error.to_string()),
    }
}

impl KafkaEventBus {
    pub fn new(settings: &KafkaSettings, publish_timeout: Duration) -> Result<Self, PublishError> {
        let producer: FutureProducer = producer_config(settings, publish_timeout)
            .create()
            .map_err(|e| PublishError::Unavailable(format!("Failed to create producer: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name("outbox-kafka")
            .build()
            .map_err(|e| PublishError::Unavailable(format!("Failed to start runtime: {}", e)))?;

        log::info!("Kafka producer configured for {}", settings.brokers);
        Ok(Self { producer, runtime })
    }
}

impl EventBus for KafkaEventBus {
    fn publish(&self, message: &BusMessage<'_>, timeout: Duration) -> Result<(), PublishError> {
        let record = FutureRecord::to(message.topic)
            .key(message.key)
            .payload(message.body);

        let delivery = self.runtime.block_on(tokio::time::timeout(
            timeout,
            self.producer.send(record, Timeout::After(timeout)),
        ));

        match delivery {
            Err(_elapsed) => Err(PublishError::Timeout(timeout)),
            Ok(Err((e, _message))) => Err(classify(e, timeout)),
            Ok(Ok((partition, offset))) => {
                log::debug!(
                    "Delivered to {} [{}] at offset {}",
                    message.topic,
                    partition,
                    offset
                );
                Ok(())
            }
        }
    }
}

impl Drop for KafkaEventBus {
    fn drop(&mut self) {
        if let Err(e) = self.producer.flush(Timeout::After(Duration::from_secs(5))) {
            log::warn!("Kafka producer did not flush cleanly: {}", e);
        }
    }
}
