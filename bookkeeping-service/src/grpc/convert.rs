//! Conversions between domain models and protobuf messages.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;

use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::grpc::proto;
use crate::models::{
    from_money, to_money, Account, CreateAccount, CreateLedger, DataMap, Ledger, LedgerType,
    Money, PostEntry, PostTransaction, Transaction, TransactionEntry, TransactionType,
};

pub fn to_timestamp(at: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

pub fn from_timestamp(ts: &Timestamp) -> LedgerResult<DateTime<Utc>> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| DateTime::<Utc>::from_timestamp(ts.seconds, nanos))
        .ok_or_else(|| {
            LedgerError::new(ErrorKind::BadDataSupplied)
                .extend(format!("invalid timestamp {}s {}ns", ts.seconds, ts.nanos))
        })
}

fn money_to_proto(money: Money) -> proto::Money {
    proto::Money {
        currency_code: money.currency_code,
        units: money.units,
        nanos: money.nanos,
    }
}

/// Decode an amount. A blank currency code means the transaction currency;
/// any other code must name it.
fn amount_from_proto(money: &proto::Money, currency: &str) -> LedgerResult<rust_decimal::Decimal> {
    let code = money.currency_code.trim();
    let code = if code.is_empty() {
        currency
    } else if code.eq_ignore_ascii_case(currency.trim()) {
        code
    } else {
        return Err(
            LedgerError::new(ErrorKind::TransactionAccountsDifferCurrency).extend(format!(
                "entry amount is {}, transaction is {}",
                code, currency
            )),
        );
    };
    from_money(&Money {
        currency_code: code.to_string(),
        units: money.units,
        nanos: money.nanos,
    })
}

pub fn ledger_to_proto(ledger: &Ledger) -> proto::Ledger {
    proto::Ledger {
        id: ledger.id.clone(),
        r#type: ledger.ledger_type.to_proto(),
        parent_id: ledger.parent_id.clone().unwrap_or_default(),
        data: ledger.data.to_string(),
        created_at: Some(to_timestamp(&ledger.created_at)),
        updated_at: Some(to_timestamp(&ledger.updated_at)),
    }
}

pub fn ledger_from_proto(ledger: proto::Ledger) -> LedgerResult<CreateLedger> {
    let ledger_type = LedgerType::from_proto(ledger.r#type).ok_or_else(|| {
        LedgerError::new(ErrorKind::BadDataSupplied).extend(format!("ledger type {}", ledger.r#type))
    })?;

    Ok(CreateLedger {
        id: ledger.id,
        ledger_type,
        parent_id: Some(ledger.parent_id).filter(|p| !p.trim().is_empty()),
        data: DataMap::parse(&ledger.data)?,
    })
}

pub fn account_to_proto(account: &Account) -> LedgerResult<proto::Account> {
    let code = account.currency.code();
    Ok(proto::Account {
        id: account.id.clone(),
        ledger_id: account.ledger_id.clone(),
        ledger_type: account.ledger_type.to_proto(),
        currency: code.to_string(),
        data: account.data.to_string(),
        cleared_balance: Some(money_to_proto(to_money(code, account.balances.cleared)?)),
        uncleared_balance: Some(money_to_proto(to_money(code, account.balances.uncleared)?)),
        reserved_balance: Some(money_to_proto(to_money(code, account.balances.reserved)?)),
        created_at: Some(to_timestamp(&account.created_at)),
        updated_at: Some(to_timestamp(&account.updated_at)),
    })
}

pub fn account_from_proto(account: proto::Account) -> LedgerResult<CreateAccount> {
    Ok(CreateAccount {
        id: account.id,
        ledger_id: account.ledger_id,
        currency: account.currency,
        data: DataMap::parse(&account.data)?,
    })
}

pub fn entry_to_proto(entry: &TransactionEntry, currency: &str) -> LedgerResult<proto::TransactionEntry> {
    Ok(proto::TransactionEntry {
        id: entry.id.clone(),
        transaction_id: entry.transaction_id.clone(),
        account_id: entry.account_id.clone(),
        amount: Some(money_to_proto(to_money(currency, entry.amount)?)),
        credit: entry.credit,
        balance: Some(money_to_proto(to_money(currency, entry.balance)?)),
    })
}

pub fn transaction_to_proto(txn: &Transaction) -> LedgerResult<proto::Transaction> {
    let entries = txn
        .entries
        .iter()
        .map(|e| entry_to_proto(e, &txn.currency))
        .collect::<LedgerResult<Vec<_>>>()?;

    Ok(proto::Transaction {
        id: txn.id.clone(),
        currency: txn.currency.clone(),
        transaction_type: txn.transaction_type.to_proto(),
        transacted_at: Some(to_timestamp(&txn.transacted_at)),
        cleared_at: txn.cleared_at.as_ref().map(to_timestamp),
        data: txn.data.to_string(),
        entries,
        created_at: Some(to_timestamp(&txn.created_at)),
        updated_at: Some(to_timestamp(&txn.updated_at)),
    })
}

pub fn transaction_from_proto(txn: proto::Transaction) -> LedgerResult<PostTransaction> {
    let transaction_type = TransactionType::from_proto(txn.transaction_type).ok_or_else(|| {
        LedgerError::new(ErrorKind::BadDataSupplied)
            .extend(format!("transaction type {}", txn.transaction_type))
    })?;

    let entries = txn
        .entries
        .iter()
        .map(|e| -> LedgerResult<PostEntry> {
            let amount = match &e.amount {
                Some(money) => amount_from_proto(money, &txn.currency)?,
                None => rust_decimal::Decimal::ZERO,
            };
            Ok(PostEntry {
                id: Some(e.id.clone()).filter(|id| !id.trim().is_empty()),
                account_id: e.account_id.clone(),
                amount,
                credit: e.credit,
            })
        })
        .collect::<LedgerResult<Vec<_>>>()?;

    Ok(PostTransaction {
        transacted_at: txn.transacted_at.as_ref().map(from_timestamp).transpose()?,
        cleared_at: txn.cleared_at.as_ref().map(from_timestamp).transpose()?,
        data: DataMap::parse(&txn.data)?,
        id: txn.id,
        currency: txn.currency,
        transaction_type,
        entries,
    })
}
