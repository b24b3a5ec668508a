//! Transaction and journal entry models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{ErrorKind, LedgerError};
use crate::models::{clamp_amount, DataMap};

/// Suffix appended to transaction and entry ids of a reversal.
pub const REVERSAL_SUFFIX: &str = "_REVERSAL";

/// Transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Normal,
    Reservation,
    Reversal,
}

impl TransactionType {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::Reservation),
            3 => Some(Self::Reversal),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Normal => 1,
            Self::Reservation => 2,
            Self::Reversal => 3,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Reservation => "RESERVATION",
            Self::Reversal => "REVERSAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "NORMAL" => Some(Self::Normal),
            "RESERVATION" => Some(Self::Reservation),
            "REVERSAL" => Some(Self::Reversal),
            _ => None,
        }
    }

    /// NORMAL and REVERSAL transactions must balance to zero.
    pub fn is_balanced(self) -> bool {
        matches!(self, Self::Normal | Self::Reversal)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted journal entry. `amount` is stored after sign orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub credit: bool,
    /// Account balance right after this entry was applied.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An entry found by search, with the currency of its transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWithCurrency {
    pub currency: String,
    pub entry: TransactionEntry,
}

/// A persisted transaction with its entries in posting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub transacted_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub data: DataMap,
    pub entries: Vec<TransactionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_cleared(&self) -> bool {
        self.cleared_at.is_some()
    }
}

/// Entry as submitted for posting. `amount` is a magnitude; `credit` gives
/// the side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEntry {
    pub id: Option<String>,
    pub account_id: String,
    pub amount: Decimal,
    pub credit: bool,
}

/// Transaction as submitted for posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTransaction {
    pub id: String,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub transacted_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub data: DataMap,
    pub entries: Vec<PostEntry>,
}

/// Entry after validation and sign orientation, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub credit: bool,
    pub balance: Decimal,
}

/// Transaction ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub id: String,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub transacted_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub data: DataMap,
    pub entries: Vec<NewEntry>,
}

/// Raw `transactions` row.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: String,
    pub currency: String,
    pub transaction_type: String,
    pub transacted_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRow {
    /// Convert, attaching hydrated entries.
    pub fn into_transaction(
        self,
        entries: Vec<TransactionEntry>,
    ) -> Result<Transaction, LedgerError> {
        let transaction_type = TransactionType::parse(&self.transaction_type).ok_or_else(|| {
            LedgerError::new(ErrorKind::SearchQueryResultsNotCasting)
                .extend(format!("unknown transaction type '{}'", self.transaction_type))
        })?;

        Ok(Transaction {
            id: self.id,
            currency: self.currency,
            transaction_type,
            transacted_at: self.transacted_at,
            cleared_at: self.cleared_at,
            data: DataMap::try_from(self.data)?,
            entries,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Raw `transaction_entries` row.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionEntryRow {
    pub id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub credit: bool,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionEntryRow> for TransactionEntry {
    fn from(row: TransactionEntryRow) -> Self {
        TransactionEntry {
            id: row.id,
            transaction_id: row.transaction_id,
            account_id: row.account_id,
            amount: clamp_amount(row.amount),
            credit: row.credit,
            balance: clamp_amount(row.balance),
            created_at: row.created_at,
        }
    }
}
