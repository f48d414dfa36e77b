pub mod models;
pub mod repository;

pub use repository::{Repository, UpsertRecord, DEFAULT_BATCH_SIZE};

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info};

/// Open the store connection used for the whole run.
///
/// Any failure here is a [`AppError::Connection`].
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    info!("Attempting to connect to database ({})", config.redacted());

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            error!("Database connection error: {}", e);
            AppError::Connection(e)
        })?;

    info!(
        "Connected to database: {}@{}:{}/{}",
        config.user, config.host, config.port, config.name
    );

    Ok(pool)
}
