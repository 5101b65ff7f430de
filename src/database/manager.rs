use std::future::Future;
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::DatabaseConfig;

/// Errors from the store
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database unavailable after {attempts} attempts: {source}")]
    Unavailable { attempts: u32, source: sqlx::Error },

    #[error("{0}")]
    Integrity(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        // SQLSTATE class 23: integrity constraint violation
        if let sqlx::Error::Database(db) = &e {
            if db.code().map(|c| c.starts_with("23")).unwrap_or(false) {
                let detail = match db.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
                    Some(pg) => pg.detail().map(str::to_string).unwrap_or_else(|| pg.message().to_string()),
                    None => db.message().to_string(),
                };
                return DatabaseError::Integrity(detail);
            }
        }
        DatabaseError::Sqlx(e)
    }
}

impl DatabaseError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, DatabaseError::Integrity(_))
    }
}

/// Pool construction, startup retry, health and migrations.
pub struct DatabaseManager;

impl DatabaseManager {
    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
    }

    /// Connects, retrying a fixed number of times before giving up for good.
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let attempts = config.connect_attempts.max(1);
        let backoff = Duration::from_millis(config.connect_backoff_ms);
        let pool = retry(attempts, backoff, || Self::pool_options(config).connect(&config.url))
            .await
            .map_err(|source| DatabaseError::Unavailable { attempts, source })?;
        info!("Connected to database (max {} connections)", config.max_connections);
        Ok(pool)
    }

    /// A pool that connects on first use; used where the store may be absent.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        Ok(Self::pool_options(config).connect_lazy(&config.url)?)
    }

    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

/// Runs `operation` up to `attempts` times with a fixed pause between failures.
pub async fn retry<T, E, F, Fut>(attempts: u32, backoff: Duration, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Attempt {}/{} failed: {}; retrying in {:?}", attempt, attempts, e, backoff);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                error!("Attempt {}/{} failed: {}; giving up", attempt, attempts, e);
                return Err(e);
            }
        }
    }
}
