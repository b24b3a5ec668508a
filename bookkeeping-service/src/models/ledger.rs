//! Ledger model: a type-tagged node in the ledger forest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{ErrorKind, LedgerError};
use crate::models::DataMap;

/// Ledger classification. Decides the normal balance side of its accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerType {
    Asset,
    Liability,
    Income,
    Expense,
    Capital,
}

impl LedgerType {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Asset),
            2 => Some(Self::Liability),
            3 => Some(Self::Income),
            4 => Some(Self::Expense),
            5 => Some(Self::Capital),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Asset => 1,
            Self::Liability => 2,
            Self::Income => 3,
            Self::Expense => 4,
            Self::Capital => 5,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Capital => "CAPITAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ASSET" => Some(Self::Asset),
            "LIABILITY" => Some(Self::Liability),
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            "CAPITAL" => Some(Self::Capital),
            _ => None,
        }
    }
}

impl std::fmt::Display for LedgerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger. `data` is the only mutable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub id: String,
    pub ledger_type: LedgerType,
    pub parent_id: Option<String>,
    pub data: DataMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLedger {
    pub id: String,
    pub ledger_type: LedgerType,
    pub parent_id: Option<String>,
    pub data: DataMap,
}

/// Raw `ledgers` row.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub id: String,
    #[sqlx(rename = "type")]
    pub ledger_type: String,
    pub parent_id: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for Ledger {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let ledger_type = LedgerType::parse(&row.ledger_type).ok_or_else(|| {
            LedgerError::new(ErrorKind::SearchQueryResultsNotCasting)
                .extend(format!("unknown ledger type '{}'", row.ledger_type))
        })?;

        Ok(Ledger {
            id: row.id,
            ledger_type,
            parent_id: row.parent_id.filter(|p| !p.is_empty()),
            data: DataMap::try_from(row.data)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
