//! Posting engine: validation, idempotence, sign orientation and persistence.
//!
//! Steps run in a fixed order and stop at the first failure:
//!
//! 1. NORMAL and REVERSAL must sum to zero and follow the debit/credit rule.
//! 2. RESERVATION must carry exactly one entry.
//! 3. There must be at least one entry.
//! 4. Referenced accounts are loaded with their balances.
//! 5. Each entry needs a non-zero amount, an existing account and a
//!    matching currency. A REVERSAL must be named `<original>_REVERSAL`,
//!    point at a NORMAL original and mirror its entries.
//! 6. An existing transaction with the same id is returned when its type
//!    and entries match, otherwise the post conflicts.
//! 7. Amounts are oriented: debits are stored positive, credits negative.
//! 8. The transaction and its entries are written atomically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::models::{
    clamp_amount, Account, Currency, NewEntry, NewTransaction, PostEntry,
    PostTransaction, Transaction, TransactionEntry, TransactionType, REVERSAL_SUFFIX,
};
use crate::services::metrics::TRANSACTIONS_TOTAL;
use crate::services::transactions::check_cleared_at;

#[derive(Clone)]
pub struct PostingEngine {
    ctx: Context,
}

enum Outcome {
    Created,
    Duplicate,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Duplicate => "duplicate",
        }
    }
}

impl PostingEngine {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Post a transaction. Posting the same transaction again returns the
    /// stored one.
    #[instrument(
        skip(self, txn),
        fields(transaction_id = %txn.id, transaction_type = %txn.transaction_type)
    )]
    pub async fn post(&self, txn: &PostTransaction) -> LedgerResult<Transaction> {
        let result = self.apply(txn).await;
        let kind = txn.transaction_type.as_str();

        match result {
            Ok((posted, outcome)) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&[kind, outcome.as_str()])
                    .inc();
                Ok(posted)
            }
            Err(err) => {
                TRANSACTIONS_TOTAL.with_label_values(&[kind, "error"]).inc();
                warn!(error = %err, "Transaction rejected");
                Err(err)
            }
        }
    }

    async fn apply(&self, txn: &PostTransaction) -> LedgerResult<(Transaction, Outcome)> {
        if txn.id.trim().is_empty() {
            return Err(LedgerError::new(ErrorKind::UnspecifiedId).extend("transaction"));
        }
        if let Some(at) = txn.cleared_at {
            check_cleared_at(at)?;
        }

        validate_shape(txn)?;

        let currency = Currency::parse(&txn.currency)?;
        let accounts = self.load_accounts(&txn.entries).await?;
        check_entries(txn, &currency, &accounts)?;

        let transactions = self.ctx.transactions();
        if let Some(original_id) = reversal_target(txn)? {
            let original = transactions.get_by_id(original_id).await?;
            check_reversal(&original, txn)?;
        }

        if let Some(existing) = transactions.find(&txn.id).await? {
            return resolve_existing(existing, txn).map(|t| (t, Outcome::Duplicate));
        }

        let new = orient(txn, &currency, &accounts, Utc::now());
        match transactions.create(&new).await {
            Ok(created) => {
                info!(transaction_id = %created.id, "Transaction posted");
                Ok((created, Outcome::Created))
            }
            Err(err) if err.is(ErrorKind::TransactionAlreadyExists) => {
                // Lost the insert race; the winner is visible now.
                match transactions.find(&txn.id).await? {
                    Some(existing) => {
                        resolve_existing(existing, txn).map(|t| (t, Outcome::Duplicate))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn load_accounts(&self, entries: &[PostEntry]) -> LedgerResult<HashMap<String, Account>> {
        let mut ids: Vec<String> = entries.iter().map(|e| e.account_id.clone()).collect();
        ids.sort();
        ids.dedup();

        let accounts = match self.ctx.accounts().list_by_id(&ids).await {
            Ok(accounts) => accounts,
            Err(err) if err.is(ErrorKind::AccountsNotFound) => Vec::new(),
            Err(err) => return Err(err),
        };

        Ok(accounts.into_iter().map(|a| (a.id.clone(), a)).collect())
    }
}

/// Signed contribution of an entry to the zero-sum check.
fn signed(entry: &PostEntry) -> Decimal {
    let amount = clamp_amount(entry.amount);
    if entry.credit {
        amount
    } else {
        -amount
    }
}

/// Steps 1 to 3: checks that need no store access.
pub fn validate_shape(txn: &PostTransaction) -> LedgerResult<()> {
    let debits = txn.entries.iter().filter(|e| !e.credit).count();
    let credits = txn.entries.len() - debits;

    if txn.transaction_type.is_balanced() {
        let sum = txn
            .entries
            .iter()
            .fold(Decimal::ZERO, |acc, e| acc + signed(e));
        if !sum.is_zero() {
            return Err(LedgerError::new(ErrorKind::TransactionHasNonZeroSum)
                .extend(format!("entries sum to {}", sum)));
        }

        // NORMAL: one debit against one or more credits. A REVERSAL
        // mirrors that: one credit against one or more debits.
        let valid = match txn.transaction_type {
            TransactionType::Normal => debits == 1 && credits >= 1,
            _ => credits == 1 && debits >= 1,
        };
        if !valid {
            return Err(LedgerError::new(ErrorKind::TransactionHasInvalidDrCrEntry)
                .extend(format!("{} debits, {} credits", debits, credits)));
        }
    } else if txn.entries.len() != 1 {
        return Err(LedgerError::new(ErrorKind::TransactionHasInvalidDrCrEntry)
            .extend(format!("reservation has {} entries", txn.entries.len())));
    }

    if txn.entries.is_empty() {
        return Err(LedgerError::new(ErrorKind::TransactionEntriesNotFound));
    }
    Ok(())
}

/// Step 5, entry by entry.
pub fn check_entries(
    txn: &PostTransaction,
    currency: &Currency,
    accounts: &HashMap<String, Account>,
) -> LedgerResult<()> {
    for entry in &txn.entries {
        if entry.amount.is_zero() {
            return Err(LedgerError::new(ErrorKind::TransactionEntryHasZeroAmount)
                .extend(format!("account '{}'", entry.account_id)));
        }
        if entry.amount.is_sign_negative() {
            return Err(LedgerError::new(ErrorKind::BadDataSupplied).extend(format!(
                "entry amount for account '{}' must be positive",
                entry.account_id
            )));
        }

        let account = accounts.get(&entry.account_id).ok_or_else(|| {
            LedgerError::new(ErrorKind::AccountNotFound).extend(format!("'{}'", entry.account_id))
        })?;

        if !account.currency.matches(currency.code()) {
            return Err(
                LedgerError::new(ErrorKind::TransactionAccountsDifferCurrency).extend(format!(
                    "account '{}' is {}, transaction is {}",
                    account.id,
                    account.currency.code(),
                    currency.code()
                )),
            );
        }
    }
    Ok(())
}

/// Debits are stored positive and credits negative, whatever the ledger
/// type, so every balance is the plain sum of its stored amounts.
pub fn orient_amount(amount: Decimal, credit: bool) -> Decimal {
    let amount = clamp_amount(amount);
    if credit {
        -amount
    } else {
        amount
    }
}

/// The original a REVERSAL points at, or `None` for other types. The
/// `_REVERSAL` suffix is reserved for reversals.
pub fn reversal_target(txn: &PostTransaction) -> LedgerResult<Option<&str>> {
    let original = txn
        .id
        .strip_suffix(REVERSAL_SUFFIX)
        .filter(|id| !id.trim().is_empty());

    match (txn.transaction_type, original) {
        (TransactionType::Reversal, Some(original)) => Ok(Some(original)),
        (TransactionType::Reversal, None) => Err(LedgerError::new(ErrorKind::BadDataSupplied)
            .extend(format!("reversal id '{}' must end in {}", txn.id, REVERSAL_SUFFIX))),
        (_, Some(_)) => Err(LedgerError::new(ErrorKind::BadDataSupplied).extend(format!(
            "id '{}' ends in {}, which only reversals may use",
            txn.id, REVERSAL_SUFFIX
        ))),
        (_, None) => Ok(None),
    }
}

/// A reversal must undo a NORMAL transaction entry for entry: same accounts
/// and amounts with debit and credit swapped.
pub fn check_reversal(original: &Transaction, reversal: &PostTransaction) -> LedgerResult<()> {
    if original.transaction_type != TransactionType::Normal {
        return Err(LedgerError::new(ErrorKind::TransactionTypeNotReversible).extend(format!(
            "'{}' is {}",
            original.id, original.transaction_type
        )));
    }

    let mut expected: Vec<(&str, Decimal, bool)> = original
        .entries
        .iter()
        .map(|e| (e.account_id.as_str(), clamp_amount(e.amount).abs(), !e.credit))
        .collect();
    let mut posted: Vec<(&str, Decimal, bool)> = reversal
        .entries
        .iter()
        .map(|e| (e.account_id.as_str(), clamp_amount(e.amount).abs(), e.credit))
        .collect();
    expected.sort();
    posted.sort();

    if expected != posted {
        return Err(LedgerError::new(ErrorKind::BadDataSupplied)
            .extend(format!("entries do not mirror '{}'", original.id)));
    }
    Ok(())
}

/// Step 7: orient amounts, fill in defaults and compute each entry's running
/// balance. Every account in `txn` must be present in `accounts`.
pub fn orient(
    txn: &PostTransaction,
    currency: &Currency,
    accounts: &HashMap<String, Account>,
    now: DateTime<Utc>,
) -> NewTransaction {
    let reservation = txn.transaction_type == TransactionType::Reservation;
    let mut running: HashMap<&str, Decimal> = HashMap::new();

    let entries = txn
        .entries
        .iter()
        .map(|entry| {
            let opening = match accounts.get(&entry.account_id) {
                Some(account) if reservation => account.balances.reserved,
                Some(account) => account.balances.posted(),
                None => Decimal::ZERO,
            };

            let amount = orient_amount(entry.amount, entry.credit);
            let balance = running
                .entry(entry.account_id.as_str())
                .or_insert(opening);
            *balance = clamp_amount(*balance + amount);

            NewEntry {
                id: entry
                    .id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                account_id: entry.account_id.clone(),
                amount,
                credit: entry.credit,
                balance: *balance,
            }
        })
        .collect();

    NewTransaction {
        id: txn.id.clone(),
        currency: currency.code().to_string(),
        transaction_type: txn.transaction_type,
        transacted_at: txn.transacted_at.unwrap_or(now),
        cleared_at: txn.cleared_at,
        data: txn.data.without_blanks(),
        entries,
    }
}

/// Whether a stored transaction carries the same `(account, |amount|)`
/// multiset as a posting.
pub fn entries_match(stored: &[TransactionEntry], posted: &[PostEntry]) -> bool {
    if stored.len() != posted.len() {
        return false;
    }

    let mut left: Vec<(&str, Decimal)> = stored
        .iter()
        .map(|e| (e.account_id.as_str(), clamp_amount(e.amount).abs()))
        .collect();
    let mut right: Vec<(&str, Decimal)> = posted
        .iter()
        .map(|e| (e.account_id.as_str(), clamp_amount(e.amount).abs()))
        .collect();
    left.sort();
    right.sort();
    left == right
}

fn resolve_existing(existing: Transaction, posted: &PostTransaction) -> LedgerResult<Transaction> {
    if existing.transaction_type != posted.transaction_type {
        return Err(LedgerError::new(ErrorKind::TransactionIsConflicting).extend(format!(
            "'{}' exists as {}",
            existing.id, existing.transaction_type
        )));
    }
    if entries_match(&existing.entries, &posted.entries) {
        info!(transaction_id = %existing.id, "Duplicate post, returning stored transaction");
        Ok(existing)
    } else {
        Err(LedgerError::new(ErrorKind::TransactionIsConflicting)
            .extend(format!("'{}' exists with different entries", existing.id)))
    }
}
