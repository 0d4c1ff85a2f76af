use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wakeline_core::NoopMetrics;
use wakeline_inventory::run_reservation_sweeper;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wakeline_sweeper=info,wakeline_inventory=info,wakeline_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = wakeline_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!(
        "Starting Wakeline reservation sweeper (every {}s)",
        config.inventory.sweep_interval_seconds
    );

    // The sweeper is the deployment's long-running singleton, so it owns
    // schema migrations.
    let db = wakeline_store::DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let redis_client = wakeline_store::RedisClient::new(
        &config.redis.url,
        &config.redis.key_prefix,
        config.inventory.snapshot_ttl_seconds,
        config.inventory.reservation_ttl_seconds,
    )
    .expect("Failed to connect to Redis");

    run_reservation_sweeper(
        Arc::new(redis_client.clone()),
        Arc::new(redis_client),
        Arc::new(NoopMetrics),
        config.inventory.sweep_interval_seconds,
    )
    .await;
}
