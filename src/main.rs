use std::io;
use std::sync::Arc;

use dotenvy::dotenv;
use master_data_outbox::application::registry::DispatchRegistry;
use master_data_outbox::application::relay::{OutboxRelay, RelayWorker, Schedule};
use master_data_outbox::config::Settings;
use master_data_outbox::infrastructure::kafka::KafkaEventBus;
use master_data_outbox::infrastructure::outbox_repo::DieselOutboxStore;
use master_data_outbox::infrastructure::part_repo::DieselPartRepository;
use master_data_outbox::{build_server, create_pool, run_migrations};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let settings = Settings::from_env().map_err(io::Error::other)?;

    let pool = create_pool(&settings.database_url, settings.database_pool_size)
        .map_err(io::Error::other)?;
    run_migrations(&pool).map_err(io::Error::other)?;

    if settings.outbox.backfill_on_start {
        DieselPartRepository::new(pool.clone())
            .backfill_part_events()
            .map_err(io::Error::other)?;
    }

    let bus = KafkaEventBus::new(&settings.kafka, settings.outbox.publish_timeout)
        .map_err(io::Error::other)?;
    let store = DieselOutboxStore::new(pool);
    let relay = OutboxRelay::new(
        store.clone(),
        bus,
        Arc::new(DispatchRegistry::master_data()),
        &settings.outbox,
    );
    let worker = RelayWorker::spawn(relay, Schedule::FixedDelay(settings.outbox.tick_interval))?;

    log::info!("Starting server at http://{}:{}", settings.host, settings.port);

    let served = build_server(
        Arc::new(store),
        settings.outbox.clone(),
        &settings.host,
        settings.port,
    )?
    .await;

    worker.stop();
    served
}
