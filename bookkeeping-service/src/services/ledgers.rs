//! Ledger store.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::jobs::PipeReader;
use crate::models::{CreateLedger, DataMap, Ledger, LedgerRow};
use crate::search::{compile, SearchNamespace};
use crate::services::metrics::{DB_QUERY_DURATION, LEDGERS_CREATED};
use crate::services::search::stream_search;

#[derive(Clone)]
pub struct LedgerStore {
    ctx: Context,
}

impl LedgerStore {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Load one ledger.
    #[instrument(skip(self), fields(ledger_id = %id))]
    pub async fn get_by_id(&self, id: &str) -> LedgerResult<Ledger> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_ledger"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, type, parent_id, data, created_at, updated_at
            FROM ledgers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.ctx.db.pool())
        .await?;

        timer.observe_duration();

        match row {
            Some(row) => Ledger::try_from(row),
            None => Err(LedgerError::new(ErrorKind::LedgerNotFound).extend(format!("'{}'", id))),
        }
    }

    /// Create a ledger under an optional parent.
    #[instrument(skip(self, input), fields(ledger_id = %input.id, ledger_type = %input.ledger_type))]
    pub async fn create(&self, input: &CreateLedger) -> LedgerResult<Ledger> {
        if input.id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("ledger"));
        }

        let parent_id = input.parent_id.as_deref().filter(|p| !p.is_empty());
        if let Some(parent) = parent_id {
            self.get_by_id(parent)
                .await
                .map_err(|e| e.extend("parent ledger"))?;
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_ledger"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            INSERT INTO ledgers (id, type, parent_id, data)
            VALUES ($1, $2, $3, $4)
            RETURNING id, type, parent_id, data, created_at, updated_at
            "#,
        )
        .bind(&input.id)
        .bind(input.ledger_type.as_str())
        .bind(parent_id)
        .bind(input.data.to_value())
        .fetch_one(self.ctx.db.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::new(ErrorKind::SystemFailure)
                    .extend(format!("ledger '{}' already exists", input.id))
                    .with_source(e)
            }
            _ => LedgerError::from(e),
        })?;

        timer.observe_duration();

        let ledger = Ledger::try_from(row)?;
        LEDGERS_CREATED
            .with_label_values(&[ledger.ledger_type.as_str()])
            .inc();
        info!(ledger_id = %ledger.id, "Ledger created");

        Ok(ledger)
    }

    /// Merge `data` into the ledger's data.
    #[instrument(skip(self, data), fields(ledger_id = %id))]
    pub async fn update(&self, id: &str, data: &DataMap) -> LedgerResult<Ledger> {
        if id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("ledger"));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_ledger"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            UPDATE ledgers
            SET data = data || $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, type, parent_id, data, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(data.without_blanks().into_value())
        .fetch_optional(self.ctx.db.pool())
        .await?;

        timer.observe_duration();

        match row {
            Some(row) => Ledger::try_from(row),
            None => Err(LedgerError::new(ErrorKind::LedgerNotFound).extend(format!("'{}'", id))),
        }
    }

    /// Compile `query` and stream matching ledgers.
    #[instrument(skip(self, cancel))]
    pub fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> LedgerResult<PipeReader<Ledger>> {
        let compiled = compile(SearchNamespace::Ledgers, query, self.ctx.search_batch_size())?;
        Ok(stream_search(
            &self.ctx,
            "search_ledgers",
            compiled,
            cancel,
            |rows: Vec<LedgerRow>| async move { rows.into_iter().map(Ledger::try_from).collect() },
        ))
    }
}
