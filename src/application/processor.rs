use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::application::registry::DispatchRegistry;
use crate::domain::errors::{PublishError, ResolutionError};
use crate::domain::outbox::OutboxRecord;
use crate::domain::ports::{BusMessage, EventBus, OutboxStore};

/// What happened to a record during one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Published,
    Failed { retry_count: i32, parked: bool },
    /// The publish attempt finished but its status update could not be
    /// stored; the record stays eligible and will be attempted again.
    Unrecorded,
}

#[derive(Debug, Error)]
enum DeliveryError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Publishes a single outbox record and records the result.
pub struct EventProcessor<S, B> {
    store: S,
    bus: B,
    registry: Arc<DispatchRegistry>,
    publish_timeout: Duration,
    max_retries: i32,
}

impl<S: OutboxStore, B: EventBus> EventProcessor<S, B> {
    pub fn new(
        store: S,
        bus: B,
        registry: Arc<DispatchRegistry>,
        publish_timeout: Duration,
        max_retries: i32,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            publish_timeout,
            max_retries,
        }
    }

    /// One publish attempt followed by one status update.
    ///
    /// Never fails: every error is turned into a `FAILED` status (or logged
    /// when even that cannot be stored) so the rest of the batch carries on.
    pub fn process(&self, record: &OutboxRecord) -> ProcessOutcome {
        match self.deliver(record) {
            Ok(topic) => self.record_published(record, topic),
            Err(reason) => self.record_failure(record, &reason),
        }
    }

    fn deliver(&self, record: &OutboxRecord) -> Result<&str, DeliveryError> {
        let route = self.registry.resolve(&record.aggregate_type)?;
        let envelope = route.build_envelope(record)?;
        let body = envelope
            .to_bytes()
            .map_err(|e| PublishError::Envelope(e.to_string()))?;
        let key = record.aggregate_id.to_string();

        self.bus.publish(
            &BusMessage {
                topic: route.topic(),
                key: &key,
                body: &body,
            },
            self.publish_timeout,
        )?;
        Ok(route.topic())
    }

    fn record_published(&self, record: &OutboxRecord, topic: &str) -> ProcessOutcome {
        match self.store.mark_published(record.id, Utc::now()) {
            Ok(()) => {
                log::info!(
                    "Published {} ({}) to {}",
                    record.event_type,
                    record.event_id,
                    topic
                );
                ProcessOutcome::Published
            }
            Err(e) => {
                log::error!(
                    "Event {} reached {} but its status was not saved, it will be sent again: {}",
                    record.event_id,
                    topic,
                    e
                );
                ProcessOutcome::Unrecorded
            }
        }
    }

    fn record_failure(&self, record: &OutboxRecord, reason: &DeliveryError) -> ProcessOutcome {
        match self.store.mark_failed(record.id) {
            Ok(retry_count) => {
                let parked = retry_count >= self.max_retries;
                if parked {
                    log::error!(
                        "Parking event {} ({} {}#{}) after {} failed attempts: {}",
                        record.event_id,
                        record.event_type,
                        record.aggregate_type,
                        record.aggregate_id,
                        retry_count,
                        reason
                    );
                } else {
                    log::warn!(
                        "Publish failed for event {} (attempt {}/{}): {}",
                        record.event_id,
                        retry_count,
                        self.max_retries,
                        reason
                    );
                }
                ProcessOutcome::Failed { retry_count, parked }
            }
            Err(e) => {
                log::error!(
                    "Publish failed for event {} ({}) and the failure could not be saved: {}",
                    record.event_id,
                    reason,
                    e
                );
                ProcessOutcome::Unrecorded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::errors::StoreError;
    use crate::domain::outbox::{OutboxStats, OutboxStatus};
    use crate::infrastructure::memory::{InMemoryEventBus, InMemoryOutboxStore};

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn processor(
        store: &InMemoryOutboxStore,
        bus: &InMemoryEventBus,
    ) -> EventProcessor<InMemoryOutboxStore, InMemoryEventBus> {
        EventProcessor::new(
            store.clone(),
            bus.clone(),
            Arc::new(DispatchRegistry::master_data()),
            TIMEOUT,
            3,
        )
    }

    fn part_payload(id: i64) -> serde_json::Value {
        json!({
            "partId": id, "code": format!("P-{id}"), "name": "Bracket",
            "partUnit": "EA", "baseQuantity": null, "leadTime": 2,
            "standardQuantity": null, "status": "ACTIVE", "deleted": false,
            "groupId": null, "categoryId": null, "standardCost": 1200,
            "standardTotalCost": null
        })
    }

    #[test]
    fn acknowledged_publish_marks_record_published() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryEventBus::new();
        let record = store.append("PART", 7, "PartCreated", 2, &part_payload(7)).unwrap();

        let outcome = processor(&store, &bus).process(&record);

        assert_eq!(outcome, ProcessOutcome::Published);
        let stored = store.get(record.id).unwrap();
        assert_eq!(stored.status, OutboxStatus::Published);
        assert!(stored.published_at.is_some());
        assert_eq!(stored.retry_count, 0);

        let messages = bus.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "part-events");
        assert_eq!(messages[0].key, "7");
        let envelope = messages[0].envelope().unwrap();
        assert_eq!(envelope.event_id, record.event_id);
        assert_eq!(envelope.event_type, "PartCreated");
        assert_eq!(envelope.version, 2);
    }

    #[test]
    fn unknown_aggregate_type_counts_as_failed_attempt() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryEventBus::new();
        let record = store.append("UNKNOWN", 1, "Mystery", 0, &json!({})).unwrap();

        let outcome = processor(&store, &bus).process(&record);

        assert_eq!(outcome, ProcessOutcome::Failed { retry_count: 1, parked: false });
        assert_eq!(store.get(record.id).unwrap().status, OutboxStatus::Failed);
        assert_eq!(bus.attempts(), 0, "nothing may reach the bus");
    }

    #[test]
    fn timeout_marks_failed_and_increments_retry_count() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryEventBus::new();
        bus.time_out_next(1);
        let record = store.append("PART", 1, "PartCreated", 0, &part_payload(1)).unwrap();

        let outcome = processor(&store, &bus).process(&record);

        assert_eq!(outcome, ProcessOutcome::Failed { retry_count: 1, parked: false });
        let stored = store.get(record.id).unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.published_at.is_none());
    }

    #[test]
    fn malformed_payload_fails_before_reaching_the_bus() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryEventBus::new();
        let record = store.append("PART", 1, "PartCreated", 0, &json!({ "bogus": 1 })).unwrap();

        let outcome = processor(&store, &bus).process(&record);

        assert!(matches!(outcome, ProcessOutcome::Failed { .. }));
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn reaching_the_retry_cap_reports_parked() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryEventBus::new();
        bus.set_always_fail(true);
        let record = store.append("PART", 1, "PartCreated", 0, &part_payload(1)).unwrap();
        let processor = processor(&store, &bus);

        let outcomes: Vec<_> = (0..3)
            .map(|_| processor.process(&store.get(record.id).unwrap()))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                ProcessOutcome::Failed { retry_count: 1, parked: false },
                ProcessOutcome::Failed { retry_count: 2, parked: false },
                ProcessOutcome::Failed { retry_count: 3, parked: true },
            ]
        );
        assert_eq!(store.stats(3).unwrap().parked, 1);
    }

    struct BrokenStore;

    impl OutboxStore for BrokenStore {
        fn fetch_eligible(&self, _: i64, _: i32) -> Result<Vec<OutboxRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn mark_published(&self, id: i64, _: chrono::DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }
        fn mark_failed(&self, id: i64) -> Result<i32, StoreError> {
            Err(StoreError::NotFound(id))
        }
        fn stats(&self, _: i32) -> Result<OutboxStats, StoreError> {
            Ok(OutboxStats::default())
        }
        fn list_parked(&self, _: i32, _: i64) -> Result<Vec<OutboxRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn find_by_event_id(&self, _: uuid::Uuid) -> Result<Option<OutboxRecord>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn status_update_failure_is_absorbed() {
        let source = InMemoryOutboxStore::new();
        let record = source.append("PART", 1, "PartCreated", 0, &part_payload(1)).unwrap();
        let bus = InMemoryEventBus::new();
        let processor = EventProcessor::new(
            BrokenStore,
            bus.clone(),
            Arc::new(DispatchRegistry::master_data()),
            TIMEOUT,
            3,
        );

        assert_eq!(processor.process(&record), ProcessOutcome::Unrecorded);
        bus.set_always_fail(true);
        assert_eq!(processor.process(&record), ProcessOutcome::Unrecorded);
    }
}
