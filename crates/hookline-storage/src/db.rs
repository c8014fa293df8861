//! Database connection and pool management

use hookline_common::config::DatabaseConfig;
use hookline_common::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Database pool wrapper
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = Self::build_url(config)?;

        info!(
            max_connections = config.max_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&url)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to connect: {}", e)))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn build_url(config: &DatabaseConfig) -> Result<String> {
        config
            .url
            .clone()
            .ok_or_else(|| Error::Config("database.url is required".to_string()))
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// Translate a sqlx error into the engine's error taxonomy
pub fn map_sqlx_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Error::DuplicateKey(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::StoreUnavailable(err.to_string())
        }
        sqlx::Error::RowNotFound => Error::NotFound(err.to_string()),
        _ => Error::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_common::config::DatabaseConfig;

    #[test]
    fn test_build_url_requires_url() {
        let config = DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
        };
        assert!(matches!(
            DatabasePool::build_url(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_map_pool_errors() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            Error::NotFound(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::Protocol("bad frame".into())),
            Error::Database(_)
        ));
    }
}
