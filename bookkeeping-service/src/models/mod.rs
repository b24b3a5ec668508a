//! Domain models for bookkeeping-service.

mod account;
mod data;
mod ledger;
mod money;
mod transaction;

pub use account::{Account, AccountRow, Balances, CreateAccount};
pub use data::DataMap;
pub use ledger::{CreateLedger, Ledger, LedgerRow, LedgerType};
pub use money::{
    clamp_amount, format_amount, from_money, parse_amount, to_money, Currency, Money,
    AMOUNT_SCALE, MAX_AMOUNT, MIN_AMOUNT,
};
pub use transaction::{
    EntryWithCurrency, NewEntry, NewTransaction, PostEntry, PostTransaction, Transaction, TransactionEntry,
    TransactionEntryRow, TransactionRow, TransactionType, REVERSAL_SUFFIX,
};
