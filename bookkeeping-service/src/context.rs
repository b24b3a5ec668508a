//! Handles shared by every store, the posting engine and the RPC service.

use std::sync::Arc;

use service_core::error::AppError;

use crate::config::BookkeepingConfig;
use crate::jobs::WorkerPool;
use crate::services::{AccountStore, Database, LedgerStore, PostingEngine, TransactionStore};

/// Built once at startup and cloned into whatever needs it.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<BookkeepingConfig>,
    pub db: Database,
    pub workers: WorkerPool,
}

impl Context {
    pub fn new(config: BookkeepingConfig, db: Database) -> Self {
        let workers = WorkerPool::new(config.workers.worker_count, config.workers.pipe_capacity);
        Self {
            config: Arc::new(config),
            db,
            workers,
        }
    }

    /// Connect to the database and start the worker pool. Migrations run when
    /// the config asks for them.
    pub async fn connect(config: BookkeepingConfig) -> Result<Self, AppError> {
        let db = Database::connect(&config.database).await?;
        if config.database.migrate {
            db.run_migrations(&config.database.migrations_path).await?;
        }
        Ok(Self::new(config, db))
    }

    /// `SYSTEM_BATCH_SIZE` for search paging.
    pub fn search_batch_size(&self) -> i64 {
        self.config.workers.search_batch_size
    }

    pub fn ledgers(&self) -> LedgerStore {
        LedgerStore::new(self.clone())
    }

    pub fn accounts(&self) -> AccountStore {
        AccountStore::new(self.clone())
    }

    pub fn transactions(&self) -> TransactionStore {
        TransactionStore::new(self.clone())
    }

    pub fn posting(&self) -> PostingEngine {
        PostingEngine::new(self.clone())
    }

    /// Cancel in-flight jobs and refuse new ones.
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}
