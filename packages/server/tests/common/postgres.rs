//! Postgres test database backed by testcontainers.
//!
//! One container is started on first use and shared by every test in the
//! binary. Each test gets its own freshly migrated database inside it, so
//! queue claims in one test never see another test's jobs.

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedPostgres {
    /// Server URL without a database name.
    server_url: String,
    _container: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let container = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            server_url: format!("postgresql://postgres:postgres@{}:{}", host, port),
            _container: container,
        })
    }

    async fn get() -> Result<&'static Self> {
        SHARED_POSTGRES.get_or_try_init(Self::init).await
    }
}

/// Create an empty database, run the migrations on it and connect.
pub async fn migrated_pool() -> Result<PgPool> {
    let shared = SharedPostgres::get().await?;
    let name = format!("arena_test_{}", Uuid::new_v4().simple());

    let mut admin = PgConnection::connect(&format!("{}/postgres", shared.server_url))
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::query(&format!("CREATE DATABASE {}", name))
        .execute(&mut admin)
        .await
        .context("Failed to create test database")?;
    admin.close().await?;

    let pool = PgPool::connect(&format!("{}/{}", shared.server_url, name))
        .await
        .context("Failed to connect to test database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}
