// Main entry point for the contest orchestrator

use std::sync::Arc;

use anyhow::{Context, Result};
use arena_core::domains::contests::{ContestSupervisor, PostgresContestStore};
use arena_core::kernel::jobs::PostgresJobStore;
use arena_core::kernel::{ArenaDeps, NatsBroker, ReqwestHttpClient};
use arena_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,arena_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting contest orchestrator");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Connect to NATS
    let broker = NatsBroker::connect(&config.nats_url).await?;
    tracing::info!(url = %config.nats_url, "NATS connected");

    let http = ReqwestHttpClient::new(config.http_timeout)?;

    let deps = Arc::new(ArenaDeps::new(
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(PostgresContestStore::new(pool)),
        Arc::new(broker),
        Arc::new(http),
        config.arena_base_url,
        config.malformed_payload_dir,
        config.scheduler,
        config.agent,
    ));

    // Start the request service
    let shutdown = CancellationToken::new();
    let requests = Arc::new(deps.request_service());
    let request_task = tokio::spawn(requests.run(shutdown.clone()));

    // Resume unfinished contests
    let supervisor = ContestSupervisor::new(deps.clone());
    let resumed = supervisor.resume_all().await?;
    tracing::info!(resumed, "Orchestrator ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!(running = supervisor.running(), "Shutting down");

    shutdown.cancel();
    request_task
        .await
        .context("Request service task failed")??;

    Ok(())
}
