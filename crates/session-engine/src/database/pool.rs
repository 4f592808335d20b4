use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Build the pool without connecting. The remote store may be down at
    /// startup; the persistence gateway absorbs that per request.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_size.max(1))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect_lazy(&config.url)?;

        info!(
            "Database pool configured (lazy): max_connections={}, acquire_timeout={}s",
            config.pool_max_size, config.pool_timeout_seconds
        );
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
