//! Ledger and account store integration tests.
//!
//! Run with: ./scripts/integ-tests.sh -p bookkeeping-service

mod common;

use bookkeeping_service::models::{CreateAccount, CreateLedger, DataMap, LedgerType};
use bookkeeping_service::ErrorKind;
use common::{context, create_account, create_ledger, data, unique};
use rust_decimal::Decimal;

#[tokio::test]
#[ignore] // Requires database - run with integ-tests.sh
async fn ledgers_nest_under_existing_parents() {
    let ctx = context().await;
    let root = create_ledger(&ctx, LedgerType::Asset).await;

    let child = ctx
        .ledgers()
        .create(&CreateLedger {
            id: unique("child"),
            ledger_type: LedgerType::Asset,
            parent_id: Some(root.id.clone()),
            data: data(r#"{"name":"cash"}"#),
        })
        .await
        .expect("child ledger");
    assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));

    let err = ctx
        .ledgers()
        .create(&CreateLedger {
            id: unique("orphan"),
            ledger_type: LedgerType::Asset,
            parent_id: Some(unique("missing")),
            data: DataMap::new(),
        })
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::LedgerNotFound));

    let err = ctx
        .ledgers()
        .create(&CreateLedger {
            id: String::new(),
            ledger_type: LedgerType::Asset,
            parent_id: None,
            data: DataMap::new(),
        })
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::UnspecifiedId));

    let err = ctx.ledgers().get_by_id(&unique("missing")).await.unwrap_err();
    assert!(err.is(ErrorKind::LedgerNotFound));
}

#[tokio::test]
#[ignore]
async fn data_updates_merge_and_skip_blanks() {
    let ctx = context().await;
    let ledger = ctx
        .ledgers()
        .create(&CreateLedger {
            id: unique("ledger"),
            ledger_type: LedgerType::Liability,
            parent_id: None,
            data: data(r#"{"name":"loans","owner":"ops"}"#),
        })
        .await
        .unwrap();

    let updated = ctx
        .ledgers()
        .update(&ledger.id, &data(r#"{"owner":"finance","name":"","region":null}"#))
        .await
        .unwrap();
    assert_eq!(updated.data.get("owner").unwrap(), "finance");
    assert_eq!(updated.data.get("name").unwrap(), "loans");
    assert!(updated.data.get("region").is_none());
    assert!(updated.updated_at >= ledger.updated_at);

    let account = create_account(&ctx, &ledger, "GBP").await;
    let updated = ctx
        .accounts()
        .update(&account.id, &data(r#"{"status":"frozen"}"#))
        .await
        .unwrap();
    assert_eq!(updated.data.get("status").unwrap(), "frozen");
    assert_eq!(updated.balances.total(), Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn accounts_validate_their_references() {
    let ctx = context().await;
    let ledger = create_ledger(&ctx, LedgerType::Capital).await;
    let account = create_account(&ctx, &ledger, "usd").await;

    assert_eq!(account.currency.code(), "USD");
    assert_eq!(account.ledger_type, LedgerType::Capital);

    let attempt = |id: String, ledger_id: String, currency: &str| CreateAccount {
        id,
        ledger_id,
        currency: currency.to_string(),
        data: DataMap::new(),
    };

    let err = ctx
        .accounts()
        .create(&attempt(account.id.clone(), ledger.id.clone(), "USD"))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AccountReferenceExists));

    let err = ctx
        .accounts()
        .create(&attempt(unique("acc"), ledger.id.clone(), "XYZ"))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::CurrencyUnknown));

    let err = ctx
        .accounts()
        .create(&attempt(unique("acc"), String::new(), "USD"))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::UnspecifiedReference));

    let err = ctx
        .accounts()
        .create(&attempt(unique("acc"), unique("missing"), "USD"))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::LedgerNotFound));
}

#[tokio::test]
#[ignore]
async fn list_by_id_reports_missing_accounts() {
    let ctx = context().await;
    let ledger = create_ledger(&ctx, LedgerType::Asset).await;
    let first = create_account(&ctx, &ledger, "USD").await;
    let second = create_account(&ctx, &ledger, "USD").await;

    let found = ctx
        .accounts()
        .list_by_id(&[second.id.clone(), first.id.clone(), unique("missing")])
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let err = ctx
        .accounts()
        .list_by_id(&[unique("missing")])
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AccountsNotFound));

    let err = ctx.accounts().get_by_id(&unique("missing")).await.unwrap_err();
    assert!(err.is(ErrorKind::AccountNotFound));
}
