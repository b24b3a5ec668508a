//! Account model with projected balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{ErrorKind, LedgerError};
use crate::models::{clamp_amount, Currency, DataMap, LedgerType};

/// Balance triplet projected from the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub cleared: Decimal,
    pub uncleared: Decimal,
    pub reserved: Decimal,
}

impl Balances {
    /// Cleared plus uncleared; what an entry's running balance reports.
    pub fn posted(&self) -> Decimal {
        clamp_amount(self.cleared + self.uncleared)
    }

    /// Sum of all three aggregates.
    pub fn total(&self) -> Decimal {
        clamp_amount(self.cleared + self.uncleared + self.reserved)
    }
}

/// Ledger account. Balances are never stored; they come from the projection
/// query on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub ledger_id: String,
    pub ledger_type: LedgerType,
    pub currency: Currency,
    pub data: DataMap,
    pub balances: Balances,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub id: String,
    pub ledger_id: String,
    pub currency: String,
    pub data: DataMap,
}

/// Row produced by the balance projection query.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: String,
    pub ledger_id: String,
    pub ledger_type: String,
    pub currency: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cleared_balance: Decimal,
    pub uncleared_balance: Decimal,
    pub reserved_balance: Decimal,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let ledger_type = LedgerType::parse(&row.ledger_type).ok_or_else(|| {
            LedgerError::new(ErrorKind::SearchQueryResultsNotCasting)
                .extend(format!("unknown ledger type '{}'", row.ledger_type))
        })?;

        Ok(Account {
            id: row.id,
            ledger_id: row.ledger_id,
            ledger_type,
            currency: Currency::parse(&row.currency)?,
            data: DataMap::try_from(row.data)?,
            balances: Balances {
                cleared: clamp_amount(row.cleared_balance),
                uncleared: clamp_amount(row.uncleared_balance),
                reserved: clamp_amount(row.reserved_balance),
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_balances_partition() {
        let b = Balances {
            cleared: Decimal::from(50),
            uncleared: Decimal::from_str("-12.5").unwrap(),
            reserved: Decimal::from(20),
        };
        assert_eq!(b.posted(), Decimal::from_str("37.5").unwrap());
        assert_eq!(b.total(), Decimal::from_str("57.5").unwrap());
    }

    #[test]
    fn test_row_conversion() {
        let now = Utc::now();
        let row = AccountRow {
            id: "a1".into(),
            ledger_id: "L1".into(),
            ledger_type: "INCOME".into(),
            currency: "usd".into(),
            data: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            cleared_balance: Decimal::from(5),
            uncleared_balance: Decimal::ZERO,
            reserved_balance: Decimal::ZERO,
        };
        let account = Account::try_from(row).unwrap();
        assert_eq!(account.ledger_type, LedgerType::Income);
        assert_eq!(account.currency.code(), "USD");
        assert_eq!(account.balances.cleared, Decimal::from(5));
    }
}
