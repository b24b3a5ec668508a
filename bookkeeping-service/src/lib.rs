//! Bookkeeping Service - double-entry ledgers, accounts and transactions
//! with projected balances and a JSON search DSL.

pub mod config;
pub mod context;
pub mod error;
pub mod grpc;
pub mod jobs;
pub mod models;
pub mod search;
pub mod services;
pub mod startup;

pub use context::Context;
pub use error::{ErrorKind, LedgerError, LedgerResult};
