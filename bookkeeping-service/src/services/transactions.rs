//! Transaction store: journal writes, entry hydration and reversal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::jobs::PipeReader;
use crate::models::{
    DataMap, EntryWithCurrency, NewTransaction, PostEntry, PostTransaction, Transaction, TransactionEntry,
    TransactionEntryRow, TransactionRow, TransactionType, REVERSAL_SUFFIX,
};
use crate::search::{compile, SearchNamespace};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::search::{search_error, stream_search};

/// Primary key of `transactions`; a violation means the id is taken.
const TRANSACTIONS_PKEY: &str = "transactions_pkey";

#[derive(Clone)]
pub struct TransactionStore {
    ctx: Context,
}

impl TransactionStore {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Insert a transaction and its entries atomically. A taken id fails
    /// with `TransactionAlreadyExists`.
    #[instrument(skip(self, txn), fields(transaction_id = %txn.id, entry_count = txn.entries.len()))]
    pub async fn create(&self, txn: &NewTransaction) -> LedgerResult<Transaction> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_transaction"])
            .start_timer();

        let mut tx = self.ctx.db.pool().begin().await?;

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (id, currency, transaction_type, transacted_at, cleared_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, currency, transaction_type, transacted_at, cleared_at, data, created_at, updated_at
            "#,
        )
        .bind(&txn.id)
        .bind(&txn.currency)
        .bind(txn.transaction_type.as_str())
        .bind(txn.transacted_at)
        .bind(txn.cleared_at)
        .bind(txn.data.to_value())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| insert_error(e, &txn.id))?;

        let mut entries = Vec::with_capacity(txn.entries.len());
        for (position, entry) in txn.entries.iter().enumerate() {
            let inserted = sqlx::query_as::<_, TransactionEntryRow>(
                r#"
                INSERT INTO transaction_entries (id, transaction_id, account_id, amount, credit, balance, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, transaction_id, account_id, amount, credit, balance, created_at
                "#,
            )
            .bind(&entry.id)
            .bind(&txn.id)
            .bind(&entry.account_id)
            .bind(entry.amount)
            .bind(entry.credit)
            .bind(entry.balance)
            .bind(position as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| insert_error(e, &txn.id))?;
            entries.push(TransactionEntry::from(inserted));
        }

        tx.commit().await?;
        timer.observe_duration();

        info!(
            transaction_id = %txn.id,
            transaction_type = %txn.transaction_type,
            "Transaction persisted"
        );

        row.into_transaction(entries)
    }

    /// Load a transaction with its entries, if it exists.
    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn find(&self, id: &str) -> LedgerResult<Option<Transaction>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, currency, transaction_type, transacted_at, cleared_at, data, created_at, updated_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.ctx.db.pool())
        .await?;

        timer.observe_duration();

        match row {
            Some(row) => self.with_entries(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load a transaction with its entries.
    pub async fn get_by_id(&self, id: &str) -> LedgerResult<Transaction> {
        self.find(id).await?.ok_or_else(|| {
            LedgerError::new(ErrorKind::TransactionNotFound).extend(format!("'{}'", id))
        })
    }

    /// Entries of the given transactions, grouped by transaction id in
    /// posting order.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn entries_by_transaction_ids(
        &self,
        ids: &[String],
    ) -> LedgerResult<HashMap<String, Vec<TransactionEntry>>> {
        load_entries(self.ctx.db.pool(), ids).await
    }

    async fn with_entries(&self, row: TransactionRow) -> LedgerResult<Transaction> {
        let mut entries = self.entries_by_transaction_ids(&[row.id.clone()]).await?;
        let own = entries.remove(&row.id).unwrap_or_default();
        row.into_transaction(own)
    }

    /// Merge `data` and, when `cleared_at` is given and the transaction is
    /// still uncleared, clear it. A cleared transaction stays cleared.
    #[instrument(skip(self, data), fields(transaction_id = %id))]
    pub async fn update(
        &self,
        id: &str,
        data: &DataMap,
        cleared_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Transaction> {
        if id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("transaction"));
        }
        if let Some(at) = cleared_at {
            check_cleared_at(at)?;
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_transaction"])
            .start_timer();

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET data = data || $2,
                cleared_at = COALESCE(cleared_at, $3),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, currency, transaction_type, transacted_at, cleared_at, data, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(data.without_blanks().into_value())
        .bind(cleared_at)
        .fetch_optional(self.ctx.db.pool())
        .await?;

        timer.observe_duration();

        let row = row.ok_or_else(|| {
            LedgerError::new(ErrorKind::TransactionNotFound).extend(format!("'{}'", id))
        })?;
        self.with_entries(row).await
    }

    /// Post the mirror image of a NORMAL transaction as `<id>_REVERSAL`.
    /// Reversing twice returns the first reversal.
    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn reverse(&self, id: &str) -> LedgerResult<Transaction> {
        if id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("transaction"));
        }

        let original = self.get_by_id(id).await?;
        let reversal = reversal_of(&original, Utc::now())?;

        info!(
            transaction_id = %original.id,
            reversal_id = %reversal.id,
            "Reversing transaction"
        );

        self.ctx.posting().post(&reversal).await
    }

    /// Compile `query` and stream matching transactions with their entries.
    #[instrument(skip(self, cancel))]
    pub fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> LedgerResult<PipeReader<Transaction>> {
        let compiled = compile(
            SearchNamespace::Transactions,
            query,
            self.ctx.search_batch_size(),
        )?;
        let pool = self.ctx.db.reader().clone();
        Ok(stream_search(
            &self.ctx,
            "search_transactions",
            compiled,
            cancel,
            move |rows: Vec<TransactionRow>| {
                let pool = pool.clone();
                async move { hydrate(&pool, rows).await }
            },
        ))
    }

    /// Compile `query` and stream matching entries, each with the currency
    /// of its transaction.
    #[instrument(skip(self, cancel))]
    pub fn search_entries(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> LedgerResult<PipeReader<EntryWithCurrency>> {
        let compiled = compile(
            SearchNamespace::TransactionEntries,
            query,
            self.ctx.search_batch_size(),
        )?;
        let pool = self.ctx.db.reader().clone();
        Ok(stream_search(
            &self.ctx,
            "search_transaction_entries",
            compiled,
            cancel,
            move |rows: Vec<TransactionEntryRow>| {
                let pool = pool.clone();
                async move { with_currencies(&pool, rows).await }
            },
        ))
    }
}

/// Reject the zero-time sentinel: a clearing time must be after the epoch.
pub fn check_cleared_at(at: DateTime<Utc>) -> LedgerResult<()> {
    if at.timestamp() <= 0 {
        return Err(LedgerError::new(ErrorKind::BadDataSupplied)
            .extend(format!("cleared_at {} is not after the epoch", at.to_rfc3339())));
    }
    Ok(())
}

/// Build the reversal posting for `original`.
pub fn reversal_of(original: &Transaction, now: DateTime<Utc>) -> LedgerResult<PostTransaction> {
    if original.transaction_type != TransactionType::Normal {
        return Err(LedgerError::new(ErrorKind::TransactionTypeNotReversible).extend(format!(
            "'{}' is {}",
            original.id, original.transaction_type
        )));
    }

    let entries = original
        .entries
        .iter()
        .map(|e| PostEntry {
            id: Some(format!("{}{}", e.id, REVERSAL_SUFFIX)),
            account_id: e.account_id.clone(),
            amount: e.amount.abs(),
            credit: !e.credit,
        })
        .collect();

    Ok(PostTransaction {
        id: format!("{}{}", original.id, REVERSAL_SUFFIX),
        currency: original.currency.clone(),
        transaction_type: TransactionType::Reversal,
        transacted_at: Some(now),
        cleared_at: original.cleared_at.map(|_| now),
        data: original.data.clone(),
        entries,
    })
}

fn insert_error(err: sqlx::Error, id: &str) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            if db_err.constraint() == Some(TRANSACTIONS_PKEY) {
                return LedgerError::new(ErrorKind::TransactionAlreadyExists)
                    .extend(format!("'{}'", id));
            }
            return LedgerError::new(ErrorKind::BadDataSupplied)
                .extend("entry id already used")
                .with_source(err);
        }
        if db_err.is_foreign_key_violation() {
            return LedgerError::new(ErrorKind::AccountNotFound).with_source(err);
        }
    }
    LedgerError::from(err)
}

async fn load_entries(
    pool: &PgPool,
    ids: &[String],
) -> LedgerResult<HashMap<String, Vec<TransactionEntry>>> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["load_entries"])
        .start_timer();

    let rows = sqlx::query_as::<_, TransactionEntryRow>(
        r#"
        SELECT id, transaction_id, account_id, amount, credit, balance, created_at
        FROM transaction_entries
        WHERE transaction_id = ANY($1)
        ORDER BY transaction_id, position
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await
    .map_err(search_error)?;

    timer.observe_duration();

    let mut grouped: HashMap<String, Vec<TransactionEntry>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.transaction_id.clone())
            .or_default()
            .push(TransactionEntry::from(row));
    }
    Ok(grouped)
}

/// Pair entry rows with their transaction's currency, one lookup per batch.
async fn with_currencies(
    pool: &PgPool,
    rows: Vec<TransactionEntryRow>,
) -> LedgerResult<Vec<EntryWithCurrency>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids: Vec<String> = rows.iter().map(|r| r.transaction_id.clone()).collect();
    ids.sort();
    ids.dedup();

    let timer = DB_QUERY_DURATION
        .with_label_values(&["load_currencies"])
        .start_timer();

    let currencies: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
        "SELECT id, currency FROM transactions WHERE id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(search_error)?
    .into_iter()
    .collect();

    timer.observe_duration();

    rows.into_iter()
        .map(|row| {
            let currency = currencies.get(&row.transaction_id).cloned().ok_or_else(|| {
                LedgerError::new(ErrorKind::TransactionNotFound)
                    .extend(format!("'{}'", row.transaction_id))
            })?;
            Ok(EntryWithCurrency {
                currency,
                entry: TransactionEntry::from(row),
            })
        })
        .collect()
}

/// Attach entries to transaction rows with one entry query per batch.
async fn hydrate(pool: &PgPool, rows: Vec<TransactionRow>) -> LedgerResult<Vec<Transaction>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut entries = load_entries(pool, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let own = entries.remove(&row.id).unwrap_or_default();
            row.into_transaction(own)
        })
        .collect()
}
