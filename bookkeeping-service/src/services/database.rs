//! Database service for bookkeeping-service.

use crate::config::DatabaseConfig;
use service_core::error::AppError;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// Primary pool plus an optional read replica.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    replica: Option<PgPool>,
}

impl Database {
    /// Connect to the primary and, when configured, the replica.
    #[instrument(skip(config), fields(service = "bookkeeping-service"))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            replica = config.replica_url.is_some(),
            "Connecting to PostgreSQL"
        );

        let pool = Self::open(&config.url, config.max_connections, config.min_connections).await?;
        let replica = match &config.replica_url {
            Some(url) => {
                Some(Self::open(url, config.max_connections, config.min_connections).await?)
            }
            None => None,
        };

        info!("PostgreSQL connection pool established");

        Ok(Self { pool, replica })
    }

    async fn open(url: &str, max_connections: u32, min_connections: u32) -> Result<PgPool, AppError> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            replica: None,
        }
    }

    /// Primary pool: writes and read-your-writes lookups.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Pool for search streams: the replica when there is one.
    pub fn reader(&self) -> &PgPool {
        self.replica.as_ref().unwrap_or(&self.pool)
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Apply migrations found under `path`.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, path: &str) -> Result<(), AppError> {
        info!(path = %path, "Running database migrations");
        let migrator = Migrator::new(Path::new(path)).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load migrations: {}", e))
        })?;
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}
