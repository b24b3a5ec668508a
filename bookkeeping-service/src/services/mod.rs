//! Stores, posting engine and infrastructure services.

pub mod accounts;
pub mod database;
pub mod ledgers;
pub mod metrics;
pub mod posting;
pub mod search;
pub mod transactions;

pub use accounts::AccountStore;
pub use database::Database;
pub use ledgers::LedgerStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use posting::PostingEngine;
pub use transactions::TransactionStore;
