//! Searchable entity namespaces and their column tables.

use crate::error::{ErrorKind, LedgerError, LedgerResult};

/// SQL type of a searchable column. Bound values are converted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Decimal,
    Bool,
    Timestamp,
}

impl ColumnType {
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Projection of accounts joined with their balance aggregates. Wrapped as a
/// sub-select so compiled predicates can name the balance columns directly.
pub const ACCOUNT_PROJECTION: &str = r#"
    WITH s AS (
        SELECT e.account_id, t.currency,
            SUM(CASE WHEN t.transaction_type IN ('NORMAL', 'REVERSAL') AND t.cleared_at IS NOT NULL THEN e.amount END) AS cleared,
            SUM(CASE WHEN t.transaction_type IN ('NORMAL', 'REVERSAL') AND t.cleared_at IS NULL THEN e.amount END) AS uncleared,
            SUM(CASE WHEN t.transaction_type = 'RESERVATION' THEN e.amount END) AS reserved
        FROM transaction_entries e
        JOIN transactions t ON e.transaction_id = t.id
        GROUP BY e.account_id, t.currency
    )
    SELECT a.id, a.ledger_id, a.ledger_type, a.currency, a.data, a.created_at, a.updated_at,
        COALESCE(s.cleared, 0) AS cleared_balance,
        COALESCE(s.uncleared, 0) AS uncleared_balance,
        COALESCE(s.reserved, 0) AS reserved_balance
    FROM accounts a
    LEFT JOIN s ON s.account_id = a.id AND s.currency = a.currency
"#;

/// Entity collections the search DSL can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchNamespace {
    Ledgers,
    Accounts,
    Transactions,
    TransactionEntries,
}

const LEDGER_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("type", ColumnType::Text),
    ("parent_id", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
    ("updated_at", ColumnType::Timestamp),
];

const ACCOUNT_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("ledger_id", ColumnType::Text),
    ("ledger_type", ColumnType::Text),
    ("currency", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
    ("updated_at", ColumnType::Timestamp),
    ("cleared_balance", ColumnType::Decimal),
    ("uncleared_balance", ColumnType::Decimal),
    ("reserved_balance", ColumnType::Decimal),
];

const TRANSACTION_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("currency", ColumnType::Text),
    ("transaction_type", ColumnType::Text),
    ("transacted_at", ColumnType::Timestamp),
    ("cleared_at", ColumnType::Timestamp),
    ("created_at", ColumnType::Timestamp),
    ("updated_at", ColumnType::Timestamp),
];

const ENTRY_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("transaction_id", ColumnType::Text),
    ("account_id", ColumnType::Text),
    ("amount", ColumnType::Decimal),
    ("credit", ColumnType::Bool),
    ("balance", ColumnType::Decimal),
    ("created_at", ColumnType::Timestamp),
];

impl SearchNamespace {
    pub fn parse(name: &str) -> LedgerResult<Self> {
        match name {
            "ledgers" => Ok(Self::Ledgers),
            "accounts" => Ok(Self::Accounts),
            "transactions" => Ok(Self::Transactions),
            "transaction_entries" => Ok(Self::TransactionEntries),
            other => Err(LedgerError::new(ErrorKind::SearchNamespaceUnknown)
                .extend(format!("'{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ledgers => "ledgers",
            Self::Accounts => "accounts",
            Self::Transactions => "transactions",
            Self::TransactionEntries => "transaction_entries",
        }
    }

    pub fn columns(&self) -> &'static [(&'static str, ColumnType)] {
        match self {
            Self::Ledgers => LEDGER_COLUMNS,
            Self::Accounts => ACCOUNT_COLUMNS,
            Self::Transactions => TRANSACTION_COLUMNS,
            Self::TransactionEntries => ENTRY_COLUMNS,
        }
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns()
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, ty)| *ty)
    }

    /// Entries carry no `data` side-channel.
    pub fn has_data(&self) -> bool {
        !matches!(self, Self::TransactionEntries)
    }

    /// Statement the compiled predicate is appended to.
    pub fn select(&self) -> String {
        match self {
            Self::Ledgers => {
                "SELECT id, type, parent_id, data, created_at, updated_at FROM ledgers".to_string()
            }
            Self::Accounts => format!("SELECT * FROM ({}) AS accounts", ACCOUNT_PROJECTION),
            Self::Transactions => "SELECT id, currency, transaction_type, transacted_at, cleared_at, \
                 data, created_at, updated_at FROM transactions"
                .to_string(),
            Self::TransactionEntries => "SELECT id, transaction_id, account_id, amount, credit, \
                 balance, created_at FROM transaction_entries"
                .to_string(),
        }
    }

    /// Stable ordering so paging by offset never skips or repeats rows.
    pub fn order_by(&self) -> &'static str {
        match self {
            Self::TransactionEntries => "ORDER BY created_at, transaction_id, position",
            _ => "ORDER BY created_at, id",
        }
    }
}

impl std::fmt::Display for SearchNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespace() {
        for ns in [
            SearchNamespace::Ledgers,
            SearchNamespace::Accounts,
            SearchNamespace::Transactions,
            SearchNamespace::TransactionEntries,
        ] {
            assert_eq!(SearchNamespace::parse(ns.as_str()).unwrap(), ns);
        }
        assert!(SearchNamespace::parse("journals")
            .unwrap_err()
            .is(ErrorKind::SearchNamespaceUnknown));
    }

    #[test]
    fn test_column_types() {
        let ns = SearchNamespace::Accounts;
        assert_eq!(ns.column_type("cleared_balance"), Some(ColumnType::Decimal));
        assert_eq!(ns.column_type("data"), None);
        assert_eq!(
            SearchNamespace::TransactionEntries.column_type("credit"),
            Some(ColumnType::Bool)
        );
        assert!(!SearchNamespace::TransactionEntries.has_data());
    }
}
