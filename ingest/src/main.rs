//! Ingest service binary.
//!
//! Boots the pipeline in order: environment configuration, tracing, metric
//! registration, database connection plus migrations, broker connection,
//! then the consumer loop until a shutdown signal arrives.

use anyhow::Context;
use depot_ingest::metrics::register_pipeline_metrics;
use depot_ingest::{Application, Config};
use depot_postgres::PostgresStore;
use depot_redpanda::RedpandaBus;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "depot_ingest=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        brokers = %config.broker.servers(),
        consumer_group = %config.broker.consumer_group,
        "configuration loaded"
    );

    register_pipeline_metrics();

    let store = PostgresStore::connect(&config.database.url)
        .await
        .context("connecting to the database")?;
    store.migrate().await.context("running migrations")?;
    info!("database ready");

    let bus = RedpandaBus::builder()
        .brokers(config.broker.servers())
        .consumer_group(config.broker.consumer_group.as_str())
        .build()
        .context("connecting to the message broker")?;

    let app = Application::new(&config, Arc::new(bus), Arc::new(store));
    app.run().await;

    Ok(())
}
