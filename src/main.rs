mod config;
mod db;
mod errors;
mod geolocation;
mod kafka;
mod models;
mod processor;
mod store;
mod tracking;

use std::sync::Arc;

use config::AppConfig;
use geolocation::PositionHub;
use processor::TrackingServices;
use store::PgTripStore;
use tracing::info;
use tracking::TripSessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Fleet Trip Tracker...");

    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let hub = Arc::new(PositionHub::new(
        config.tracking.permission_policy(),
        config.tracking.fix_max_age(),
        config.tracking.fix_timeout(),
    ));
    let store = Arc::new(PgTripStore::new(pool));
    let sessions = Arc::new(TripSessionManager::new(
        hub.clone(),
        store,
        config.tracking.watch_options(),
    ));

    kafka::start_kafka_consumer(&config, TrackingServices { hub, sessions }).await?;

    Ok(())
}
