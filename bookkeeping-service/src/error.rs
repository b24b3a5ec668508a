//! Coded error taxonomy for the bookkeeping engine.
//!
//! Every failure the engine reports carries a stable numeric code, a primary
//! message, an optional detail appended with [`LedgerError::extend`] and an
//! optional underlying cause.

use std::fmt;

use service_core::grpc::IntoStatus;
use tonic::{Code, Status};

/// gRPC metadata key carrying the numeric error code.
pub const ERROR_CODE_KEY: &str = "x-error-code";

/// Stable error kinds grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // System
    SystemFailure,
    BadDataSupplied,
    UnspecifiedId,
    UnspecifiedReference,
    Canceled,

    // Ledger
    LedgerNotFound,

    // Account
    AccountNotFound,
    AccountsNotFound,
    CurrencyUnknown,
    AccountReferenceExists,

    // Transaction
    TransactionNotFound,
    TransactionEntriesNotFound,
    TransactionEntryHasZeroAmount,
    TransactionAccountsDifferCurrency,
    TransactionAlreadyExists,
    TransactionHasNonZeroSum,
    TransactionHasInvalidDrCrEntry,
    TransactionIsConflicting,
    TransactionTypeNotReversible,

    // Search
    SearchNamespaceUnknown,
    SearchQueryHasInvalidFormat,
    SearchQueryHasInvalidKeys,
    SearchQueryResultsNotCasting,
}

impl ErrorKind {
    /// Numeric code, stable across releases.
    pub fn code(self) -> u32 {
        match self {
            Self::SystemFailure => 1000,
            Self::BadDataSupplied => 1001,
            Self::UnspecifiedId => 1002,
            Self::UnspecifiedReference => 1003,
            Self::Canceled => 1004,

            Self::LedgerNotFound => 2000,

            Self::AccountNotFound => 3000,
            Self::AccountsNotFound => 3001,
            Self::CurrencyUnknown => 3002,
            Self::AccountReferenceExists => 3003,

            Self::TransactionNotFound => 4000,
            Self::TransactionEntriesNotFound => 4001,
            Self::TransactionEntryHasZeroAmount => 4002,
            Self::TransactionAccountsDifferCurrency => 4003,
            Self::TransactionAlreadyExists => 4004,
            Self::TransactionHasNonZeroSum => 4005,
            Self::TransactionHasInvalidDrCrEntry => 4006,
            Self::TransactionIsConflicting => 4007,
            Self::TransactionTypeNotReversible => 4008,

            Self::SearchNamespaceUnknown => 5000,
            Self::SearchQueryHasInvalidFormat => 5001,
            Self::SearchQueryHasInvalidKeys => 5002,
            Self::SearchQueryResultsNotCasting => 5003,
        }
    }

    /// Primary, client-facing message.
    pub fn message(self) -> &'static str {
        match self {
            Self::SystemFailure => "system failure",
            Self::BadDataSupplied => "bad data supplied",
            Self::UnspecifiedId => "id is not specified",
            Self::UnspecifiedReference => "reference is not specified",
            Self::Canceled => "operation canceled",

            Self::LedgerNotFound => "ledger not found",

            Self::AccountNotFound => "account not found",
            Self::AccountsNotFound => "accounts not found",
            Self::CurrencyUnknown => "currency is unknown",
            Self::AccountReferenceExists => "account reference already exists",

            Self::TransactionNotFound => "transaction not found",
            Self::TransactionEntriesNotFound => "transaction has no entries",
            Self::TransactionEntryHasZeroAmount => "transaction entry has zero amount",
            Self::TransactionAccountsDifferCurrency => {
                "transaction accounts differ in currency"
            }
            Self::TransactionAlreadyExists => "transaction already exists",
            Self::TransactionHasNonZeroSum => "transaction entries do not sum to zero",
            Self::TransactionHasInvalidDrCrEntry => {
                "transaction has an invalid debit/credit entry pattern"
            }
            Self::TransactionIsConflicting => {
                "transaction conflicts with an existing transaction of the same id"
            }
            Self::TransactionTypeNotReversible => "transaction type is not reversible",

            Self::SearchNamespaceUnknown => "search namespace is unknown",
            Self::SearchQueryHasInvalidFormat => "search query has an invalid format",
            Self::SearchQueryHasInvalidKeys => "search query has invalid keys",
            Self::SearchQueryResultsNotCasting => "search results could not be cast",
        }
    }

    /// Label used for the `errors_total` metric.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemFailure => "system_failure",
            Self::BadDataSupplied => "bad_data_supplied",
            Self::UnspecifiedId => "unspecified_id",
            Self::UnspecifiedReference => "unspecified_reference",
            Self::Canceled => "canceled",
            Self::LedgerNotFound => "ledger_not_found",
            Self::AccountNotFound => "account_not_found",
            Self::AccountsNotFound => "accounts_not_found",
            Self::CurrencyUnknown => "currency_unknown",
            Self::AccountReferenceExists => "account_reference_exists",
            Self::TransactionNotFound => "transaction_not_found",
            Self::TransactionEntriesNotFound => "transaction_entries_not_found",
            Self::TransactionEntryHasZeroAmount => "transaction_entry_has_zero_amount",
            Self::TransactionAccountsDifferCurrency => "transaction_accounts_differ_currency",
            Self::TransactionAlreadyExists => "transaction_already_exists",
            Self::TransactionHasNonZeroSum => "transaction_has_non_zero_sum",
            Self::TransactionHasInvalidDrCrEntry => "transaction_has_invalid_dr_cr_entry",
            Self::TransactionIsConflicting => "transaction_is_conflicting",
            Self::TransactionTypeNotReversible => "transaction_type_not_reversible",
            Self::SearchNamespaceUnknown => "search_namespace_unknown",
            Self::SearchQueryHasInvalidFormat => "search_query_has_invalid_format",
            Self::SearchQueryHasInvalidKeys => "search_query_has_invalid_keys",
            Self::SearchQueryResultsNotCasting => "search_query_results_not_casting",
        }
    }

    fn grpc_code(self) -> Code {
        match self {
            Self::SystemFailure => Code::Internal,
            Self::Canceled => Code::Cancelled,
            Self::LedgerNotFound
            | Self::AccountNotFound
            | Self::AccountsNotFound
            | Self::TransactionNotFound => Code::NotFound,
            Self::TransactionIsConflicting
            | Self::TransactionAlreadyExists
            | Self::AccountReferenceExists => Code::AlreadyExists,
            Self::TransactionTypeNotReversible => Code::FailedPrecondition,
            Self::BadDataSupplied
            | Self::UnspecifiedId
            | Self::UnspecifiedReference
            | Self::CurrencyUnknown
            | Self::TransactionEntriesNotFound
            | Self::TransactionEntryHasZeroAmount
            | Self::TransactionAccountsDifferCurrency
            | Self::TransactionHasNonZeroSum
            | Self::TransactionHasInvalidDrCrEntry
            | Self::SearchNamespaceUnknown
            | Self::SearchQueryHasInvalidFormat
            | Self::SearchQueryHasInvalidKeys
            | Self::SearchQueryResultsNotCasting => Code::InvalidArgument,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Engine error: a kind plus optional detail and cause.
#[derive(Debug, thiserror::Error)]
#[error("[{}] {}{}", .kind.code(), .kind.message(), render_detail(.detail))]
pub struct LedgerError {
    kind: ErrorKind,
    detail: Option<String>,
    #[source]
    source: Option<anyhow::Error>,
}

fn render_detail(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

impl LedgerError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Append a detail message. Repeated calls accumulate.
    pub fn extend(mut self, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        self.detail = Some(match self.detail.take() {
            Some(existing) => format!("{}: {}", existing, msg),
            None => msg,
        });
        self
    }

    /// Attach an underlying cause, replacing any previous one.
    pub fn with_source(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.source = Some(err.into());
        self
    }

    /// Replace the cause chain with the given errors. The first error becomes
    /// the root cause; later ones wrap it as context.
    pub fn replace_causes<I, E>(mut self, errs: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<anyhow::Error>,
    {
        self.source = errs.into_iter().fold(None, |chain, err| {
            let err: anyhow::Error = err.into();
            Some(match chain {
                None => err,
                Some(inner) => inner.context(err.to_string()),
            })
        });
        self
    }

    /// Wrap a store-level fault.
    pub fn system(err: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::SystemFailure).with_source(err)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled)
    }
}

impl From<ErrorKind> for LedgerError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Map database faults. Decode failures are reported as casting errors so the
/// search caller can tell a malformed row from an unavailable store.
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                LedgerError::new(ErrorKind::SearchQueryResultsNotCasting).with_source(err)
            }
            other => LedgerError::system(other),
        }
    }
}

impl IntoStatus for LedgerError {
    fn into_status(self) -> Status {
        let mut status = match self.kind {
            ErrorKind::SystemFailure => {
                tracing::error!(error = %self, cause = ?self.source, "System failure");
                Status::internal(self.kind.message())
            }
            kind => Status::new(kind.grpc_code(), self.to_string()),
        };
        if let Ok(value) = self.kind.code().to_string().parse() {
            status.metadata_mut().insert(ERROR_CODE_KEY, value);
        }
        status
    }
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        err.into_status()
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code_and_detail() {
        let err = LedgerError::new(ErrorKind::AccountNotFound).extend("acc-1");
        assert_eq!(err.to_string(), "[3000] account not found: acc-1");
    }

    #[test]
    fn test_extend_accumulates() {
        let err = LedgerError::new(ErrorKind::BadDataSupplied)
            .extend("data")
            .extend("must be an object");
        assert_eq!(err.detail(), Some("data: must be an object"));
    }

    #[test]
    fn test_replace_causes_keeps_last_chain() {
        let err = LedgerError::system(anyhow::anyhow!("first"))
            .replace_causes(vec![anyhow::anyhow!("root"), anyhow::anyhow!("outer")]);
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "outer");
    }

    #[test]
    fn test_status_mapping() {
        let status: Status = LedgerError::new(ErrorKind::TransactionIsConflicting).into();
        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(
            status.metadata().get(ERROR_CODE_KEY).unwrap().to_str().unwrap(),
            "4007"
        );

        let status: Status = LedgerError::new(ErrorKind::TransactionTypeNotReversible).into();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let status: Status = LedgerError::canceled().into();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[test]
    fn test_system_failure_hides_cause() {
        let status: Status = LedgerError::system(anyhow::anyhow!("password=secret")).into();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("secret"));
    }

    #[test]
    fn test_codes_are_unique() {
        use std::collections::HashSet;
        let kinds = [
            ErrorKind::SystemFailure,
            ErrorKind::BadDataSupplied,
            ErrorKind::UnspecifiedId,
            ErrorKind::UnspecifiedReference,
            ErrorKind::Canceled,
            ErrorKind::LedgerNotFound,
            ErrorKind::AccountNotFound,
            ErrorKind::AccountsNotFound,
            ErrorKind::CurrencyUnknown,
            ErrorKind::AccountReferenceExists,
            ErrorKind::TransactionNotFound,
            ErrorKind::TransactionEntriesNotFound,
            ErrorKind::TransactionEntryHasZeroAmount,
            ErrorKind::TransactionAccountsDifferCurrency,
            ErrorKind::TransactionAlreadyExists,
            ErrorKind::TransactionHasNonZeroSum,
            ErrorKind::TransactionHasInvalidDrCrEntry,
            ErrorKind::TransactionIsConflicting,
            ErrorKind::TransactionTypeNotReversible,
            ErrorKind::SearchNamespaceUnknown,
            ErrorKind::SearchQueryHasInvalidFormat,
            ErrorKind::SearchQueryHasInvalidKeys,
            ErrorKind::SearchQueryResultsNotCasting,
        ];
        let codes: HashSet<u32> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
