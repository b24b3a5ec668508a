//! End-to-end gRPC smoke tests against a spawned service.
//!
//! Run with: ./scripts/integ-tests.sh -p bookkeeping-service

mod common;

use bookkeeping_service::error::ERROR_CODE_KEY;
use bookkeeping_service::grpc::proto::{
    Account, CreateAccountRequest, CreateLedgerRequest, CreateTransactionRequest, Ledger,
    LedgerType, Money, ReverseTransactionRequest, SearchRequest, Transaction, TransactionEntry,
    TransactionType, UpdateTransactionRequest,
};
use common::{spawn_app, unique};
use futures::StreamExt;
use tonic::Code;

fn usd(units: i64) -> Option<Money> {
    Some(Money {
        currency_code: "USD".to_string(),
        units,
        nanos: 0,
    })
}

#[tokio::test]
#[ignore] // Requires database - run with integ-tests.sh
async fn post_search_and_reverse_over_grpc() {
    let (mut client, _ctx) = spawn_app().await;

    let mut ledger_ids = Vec::new();
    for ledger_type in [LedgerType::Asset, LedgerType::Income] {
        let ledger = client
            .create_ledger(CreateLedgerRequest {
                ledger: Some(Ledger {
                    id: unique("ledger"),
                    r#type: ledger_type as i32,
                    data: r#"{"source":"rpc"}"#.to_string(),
                    ..Default::default()
                }),
            })
            .await
            .expect("create ledger")
            .into_inner()
            .ledger
            .unwrap();
        ledger_ids.push(ledger.id);
    }

    let mut account_ids = Vec::new();
    for ledger_id in &ledger_ids {
        let account = client
            .create_account(CreateAccountRequest {
                account: Some(Account {
                    id: unique("acc"),
                    ledger_id: ledger_id.clone(),
                    currency: "USD".to_string(),
                    ..Default::default()
                }),
            })
            .await
            .expect("create account")
            .into_inner()
            .account
            .unwrap();
        account_ids.push(account.id);
    }

    let txn_id = unique("t");
    let posted = client
        .create_transaction(CreateTransactionRequest {
            transaction: Some(Transaction {
                id: txn_id.clone(),
                currency: "USD".to_string(),
                transaction_type: TransactionType::Normal as i32,
                entries: vec![
                    TransactionEntry {
                        account_id: account_ids[0].clone(),
                        amount: usd(40),
                        credit: false,
                        ..Default::default()
                    },
                    TransactionEntry {
                        account_id: account_ids[1].clone(),
                        amount: usd(40),
                        credit: true,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
        })
        .await
        .expect("create transaction")
        .into_inner()
        .transaction
        .unwrap();
    assert_eq!(posted.entries.len(), 2);
    assert!(posted.cleared_at.is_none());

    let cleared = client
        .update_transaction(UpdateTransactionRequest {
            id: txn_id.clone(),
            data: r#"{"note":"cleared"}"#.to_string(),
            cleared_at: Some(prost_types::Timestamp {
                seconds: chrono::Utc::now().timestamp(),
                nanos: 0,
            }),
        })
        .await
        .expect("clear transaction")
        .into_inner()
        .transaction
        .unwrap();
    assert!(cleared.cleared_at.is_some());

    let query = format!(
        r#"{{"query":{{"must":{{"fields":[{{"id":{{"eq":"{}"}}}}]}}}}}}"#,
        account_ids[0]
    );
    let mut stream = client
        .search_accounts(SearchRequest { query })
        .await
        .expect("search accounts")
        .into_inner();
    let mut accounts = Vec::new();
    while let Some(message) = stream.next().await {
        accounts.extend(message.expect("search batch").accounts);
    }
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].cleared_balance, usd(40));

    let reversal = client
        .reverse_transaction(ReverseTransactionRequest { id: txn_id.clone() })
        .await
        .expect("reverse transaction")
        .into_inner()
        .transaction
        .unwrap();
    assert_eq!(reversal.id, format!("{}_REVERSAL", txn_id));
    assert_eq!(reversal.transaction_type, TransactionType::Reversal as i32);

    let status = client
        .reverse_transaction(ReverseTransactionRequest { id: reversal.id })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(
        status.metadata().get(ERROR_CODE_KEY).unwrap().to_str().unwrap(),
        "4008"
    );
}

#[tokio::test]
#[ignore]
async fn bad_requests_map_to_status_codes() {
    let (mut client, _ctx) = spawn_app().await;

    let status = client
        .create_ledger(CreateLedgerRequest { ledger: None })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .create_account(CreateAccountRequest {
            account: Some(Account {
                id: unique("acc"),
                ledger_id: unique("missing"),
                currency: "USD".to_string(),
                ..Default::default()
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = client
        .search_ledgers(SearchRequest {
            query: r#"{"query":{"must":{"fields":[{"shape":{"eq":"round"}}]}}}"#.to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}
