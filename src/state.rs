use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::KeyPair;
use crate::config::AppConfig;
use crate::database::models;
use crate::filter::{Catalog, FilterError, SchemaRegistry};

/// Shared by every handler; everything but the pool is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub catalog: Arc<Catalog>,
    pub schemas: Arc<SchemaRegistry>,
    pub keys: Arc<KeyPair>,
}

impl AppState {
    /// Registers the entity catalog and validates every endpoint schema against it.
    pub fn new(pool: PgPool, config: AppConfig, keys: KeyPair) -> Result<Self, FilterError> {
        let catalog = models::catalog();
        let schemas = models::schemas(&catalog)?;
        Ok(Self {
            pool,
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            schemas: Arc::new(schemas),
            keys: Arc::new(keys),
        })
    }
}
