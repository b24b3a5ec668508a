//! Common test utilities for bookkeeping-service integration tests.
//!
//! Every test needs `TEST_DATABASE_URL` and isolates itself with fresh ids.

#![allow(dead_code)]

use bookkeeping_service::config::{
    BookkeepingConfig, DatabaseConfig, SecurityConfig, WorkerConfig,
};
use bookkeeping_service::grpc::proto::bookkeeping_service_client::BookkeepingServiceClient;
use bookkeeping_service::jobs::PipeReader;
use bookkeeping_service::models::{
    Account, CreateAccount, CreateLedger, DataMap, Ledger, LedgerType, PostEntry,
    PostTransaction, TransactionType,
};
use bookkeeping_service::startup::Application;
use bookkeeping_service::{Context, LedgerResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use service_core::observability::init_test_tracing;
use tonic::transport::Channel;
use uuid::Uuid;

pub fn test_config() -> BookkeepingConfig {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set - use scripts/integ-tests.sh to run tests");

    BookkeepingConfig {
        common: CommonConfig::with_port(0),
        service_name: "bookkeeping-service-test".to_string(),
        service_version: "test".to_string(),
        grpc_port: 0,
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        trace_queries: true,
        database: DatabaseConfig {
            url: database_url,
            replica_url: None,
            max_connections: 5,
            min_connections: 1,
            migrate: true,
            migrations_path: concat!(env!("CARGO_MANIFEST_DIR"), "/migrations").to_string(),
        },
        security: SecurityConfig {
            run_securely: false,
            oidc_audience: String::new(),
            oidc_issuer: String::new(),
        },
        workers: WorkerConfig {
            worker_count: 8,
            pipe_capacity: 2,
            search_batch_size: 2,
        },
    }
}

/// Connect, migrate and start a worker pool.
pub async fn context() -> Context {
    init_test_tracing();
    Context::connect(test_config())
        .await
        .expect("Failed to connect to test database")
}

/// Spawn the full service and return a connected gRPC client.
pub async fn spawn_app() -> (BookkeepingServiceClient<Channel>, Context) {
    init_test_tracing();

    let app = Application::build(test_config())
        .await
        .expect("Failed to build application");
    let ctx = app.context().clone();
    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let mut attempts = 0;
    let client = loop {
        match BookkeepingServiceClient::connect(grpc_addr.clone()).await {
            Ok(client) => break client,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
        }
    };

    (client, ctx)
}

/// Id unique to this run.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

pub fn dec(raw: &str) -> Decimal {
    raw.parse().expect("valid decimal")
}

pub fn data(raw: &str) -> DataMap {
    DataMap::parse(raw).expect("valid data")
}

pub async fn create_ledger(ctx: &Context, ledger_type: LedgerType) -> Ledger {
    ctx.ledgers()
        .create(&CreateLedger {
            id: unique("ledger"),
            ledger_type,
            parent_id: None,
            data: DataMap::new(),
        })
        .await
        .expect("Failed to create ledger")
}

pub async fn create_account(ctx: &Context, ledger: &Ledger, currency: &str) -> Account {
    create_account_with(ctx, ledger, currency, DataMap::new()).await
}

pub async fn create_account_with(
    ctx: &Context,
    ledger: &Ledger,
    currency: &str,
    data: DataMap,
) -> Account {
    ctx.accounts()
        .create(&CreateAccount {
            id: unique("acc"),
            ledger_id: ledger.id.clone(),
            currency: currency.to_string(),
            data,
        })
        .await
        .expect("Failed to create account")
}

/// An ASSET account and an INCOME account, both in USD.
pub async fn asset_and_income(ctx: &Context) -> (Account, Account) {
    let assets = create_ledger(ctx, LedgerType::Asset).await;
    let income = create_ledger(ctx, LedgerType::Income).await;
    (
        create_account(ctx, &assets, "USD").await,
        create_account(ctx, &income, "USD").await,
    )
}

pub fn debit(account: &Account, amount: &str) -> PostEntry {
    PostEntry {
        id: None,
        account_id: account.id.clone(),
        amount: dec(amount),
        credit: false,
    }
}

pub fn credit(account: &Account, amount: &str) -> PostEntry {
    PostEntry {
        id: None,
        account_id: account.id.clone(),
        amount: dec(amount),
        credit: true,
    }
}

pub fn transaction(
    id: &str,
    transaction_type: TransactionType,
    cleared_at: Option<DateTime<Utc>>,
    entries: Vec<PostEntry>,
) -> PostTransaction {
    PostTransaction {
        id: id.to_string(),
        currency: "USD".to_string(),
        transaction_type,
        transacted_at: None,
        cleared_at,
        data: DataMap::new(),
        entries,
    }
}

/// Reload an account so its balances reflect every post so far.
pub async fn reload(ctx: &Context, account: &Account) -> Account {
    ctx.accounts()
        .get_by_id(&account.id)
        .await
        .expect("Failed to reload account")
}

/// Drain a search pipe into one list, failing on the first error.
pub async fn drain<T>(mut reader: PipeReader<T>) -> LedgerResult<Vec<T>> {
    let mut all = Vec::new();
    while let Some(batch) = reader.read_result().await {
        all.extend(batch?);
    }
    Ok(all)
}
