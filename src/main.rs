//! datastore-worker - standalone queue worker for the MongoDB datastore
//!
//! Connects, bootstraps the system collections and consumes the queue until
//! interrupted. Records on the `log` topic are written to the log.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongo_datastore::{
    db::json::bson_to_json, Completion, Datastore, HandlerRegistry, QueueRequest, StoreConfig,
    StoreError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let config = StoreConfig::parse();

    let log_level = config.log_level.clone();
    let json_logs = config.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "mongo_datastore={0},datastore_worker={0},info",
                    log_level
                )
                .into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Datastore worker");
    info!("======================================");
    info!("MongoDB: {}", config.mongodb_uri);
    info!("Database: {}", config.mongodb_db);
    info!("Queue log: {} ({} bytes)", config.queue_collection, config.queue_max_bytes);
    info!("Key-value: {}", config.kv_collection);
    info!("======================================");

    let registry = HandlerRegistry::new();
    registry.set("log", |req: QueueRequest, done: Completion| async move {
        info!(payload = %bson_to_json(req.body.payload), "log");
        done.end();
        Ok::<(), StoreError>(())
    });

    let store = Datastore::connect(config, registry).await?;
    let report = store.bootstrap_report();
    if !report.is_clean() {
        warn!(
            "Bootstrap incomplete: queue {}, key-value {}",
            report.queue_collection, report.kv_collection
        );
    }

    info!("Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    store.shutdown().await;
    Ok(())
}
