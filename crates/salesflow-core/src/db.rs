use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Establish a Postgres connection pool for the connection registered
/// under `config.connection_id`.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let database_url = config.resolve_url()?;
    connect_url(&database_url, config).await
}

pub async fn connect_url(database_url: &str, config: &DatabaseConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await?;

    info!(connection_id = %config.connection_id, "database connection pool established");
    Ok(pool)
}
