//! Account store. Balances come from the journal projection on every read.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::jobs::PipeReader;
use crate::models::{Account, AccountRow, CreateAccount, Currency, DataMap};
use crate::search::{compile, SearchNamespace, ACCOUNT_PROJECTION};
use crate::services::metrics::{ACCOUNTS_CREATED, DB_QUERY_DURATION};
use crate::services::search::stream_search;

#[derive(Clone)]
pub struct AccountStore {
    ctx: Context,
}

impl AccountStore {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Load one account with its balances.
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn get_by_id(&self, id: &str) -> LedgerResult<Account> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let sql = format!("SELECT * FROM ({}) AS accounts WHERE id = $1", ACCOUNT_PROJECTION);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(self.ctx.db.pool())
            .await?;

        timer.observe_duration();

        match row {
            Some(row) => Account::try_from(row),
            None => Err(LedgerError::new(ErrorKind::AccountNotFound).extend(format!("'{}'", id))),
        }
    }

    /// Load every existing account among `ids`, in one projection query.
    /// Fails only when none of them exist.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn list_by_id(&self, ids: &[String]) -> LedgerResult<Vec<Account>> {
        if ids.is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("accounts"));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let sql = format!(
            "SELECT * FROM ({}) AS accounts WHERE id = ANY($1) ORDER BY id",
            ACCOUNT_PROJECTION
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(ids)
            .fetch_all(self.ctx.db.pool())
            .await?;

        timer.observe_duration();

        if rows.is_empty() {
            return Err(LedgerError::new(ErrorKind::AccountsNotFound).extend(ids.join(", ")));
        }
        rows.into_iter().map(Account::try_from).collect()
    }

    /// Open an account on an existing ledger. The ledger's type is copied
    /// onto the account and never re-synced.
    #[instrument(skip(self, input), fields(account_id = %input.id, ledger_id = %input.ledger_id))]
    pub async fn create(&self, input: &CreateAccount) -> LedgerResult<Account> {
        if input.id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("account"));
        }
        if input.ledger_id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedReference).extend("ledger"));
        }

        let currency = Currency::parse(&input.currency)?;
        let ledger = self.ctx.ledgers().get_by_id(&input.ledger_id).await?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (id, ledger_id, ledger_type, currency, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, ledger_id, ledger_type, currency, data, created_at, updated_at,
                0::NUMERIC AS cleared_balance,
                0::NUMERIC AS uncleared_balance,
                0::NUMERIC AS reserved_balance
            "#,
        )
        .bind(&input.id)
        .bind(&ledger.id)
        .bind(ledger.ledger_type.as_str())
        .bind(currency.code())
        .bind(input.data.to_value())
        .fetch_one(self.ctx.db.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::new(ErrorKind::AccountReferenceExists)
                    .extend(format!("'{}'", input.id))
            }
            _ => LedgerError::from(e),
        })?;

        timer.observe_duration();

        let account = Account::try_from(row)?;
        ACCOUNTS_CREATED
            .with_label_values(&[account.ledger_type.as_str()])
            .inc();
        info!(
            account_id = %account.id,
            currency = %account.currency.code(),
            "Account created"
        );

        Ok(account)
    }

    /// Merge `data` into the account's data and return it re-projected.
    #[instrument(skip(self, data), fields(account_id = %id))]
    pub async fn update(&self, id: &str, data: &DataMap) -> LedgerResult<Account> {
        if id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("account"));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_account"])
            .start_timer();

        let updated = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE accounts
            SET data = data || $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(data.without_blanks().into_value())
        .fetch_optional(self.ctx.db.pool())
        .await?;

        timer.observe_duration();

        match updated {
            Some(id) => self.get_by_id(&id).await,
            None => Err(LedgerError::new(ErrorKind::AccountNotFound).extend(format!("'{}'", id))),
        }
    }

    /// Compile `query` and stream matching accounts with their balances.
    #[instrument(skip(self, cancel))]
    pub fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> LedgerResult<PipeReader<Account>> {
        let compiled = compile(SearchNamespace::Accounts, query, self.ctx.search_batch_size())?;
        Ok(stream_search(
            &self.ctx,
            "search_accounts",
            compiled,
            cancel,
            |rows: Vec<AccountRow>| async move { rows.into_iter().map(Account::try_from).collect() },
        ))
    }
}
