//! BookkeepingService gRPC implementation.
//!
//! Unary calls run on the worker pool. Search calls stream one message per
//! job-pipe batch; a client that hangs up cancels the producer.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::grpc::convert::{
    account_from_proto, account_to_proto, entry_to_proto, from_timestamp, ledger_from_proto,
    ledger_to_proto, transaction_from_proto, transaction_to_proto,
};
use crate::grpc::proto::{
    bookkeeping_service_server::BookkeepingService, CreateAccountRequest, CreateAccountResponse,
    CreateLedgerRequest, CreateLedgerResponse, CreateTransactionRequest,
    CreateTransactionResponse, ReverseTransactionRequest, ReverseTransactionResponse,
    SearchAccountsResponse, SearchLedgersResponse, SearchRequest,
    SearchTransactionEntriesResponse, SearchTransactionsResponse, UpdateAccountRequest,
    UpdateAccountResponse, UpdateLedgerRequest, UpdateLedgerResponse, UpdateTransactionRequest,
    UpdateTransactionResponse,
};
use crate::jobs::PipeReader;
use crate::models::DataMap;
use crate::services::metrics::{record_error, GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};

type ResponseStream<M> = Pin<Box<dyn futures::Stream<Item = Result<M, Status>> + Send>>;

/// Messages buffered between a search job and the client.
const STREAM_BUFFER: usize = 1;

pub struct BookkeepingServiceImpl {
    ctx: Context,
}

impl BookkeepingServiceImpl {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Run a unary call on the worker pool and record its outcome.
    async fn unary<T, F>(&self, method: &'static str, work: F) -> Result<T, Status>
    where
        F: Future<Output = LedgerResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[method])
            .start_timer();
        let result = self.ctx.workers.run(method, work).await;
        timer.observe_duration();
        finish(method, result)
    }
}

fn status_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "cancelled",
        Code::InvalidArgument => "invalid_argument",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::FailedPrecondition => "failed_precondition",
        Code::Unauthenticated => "unauthenticated",
        Code::Unavailable => "unavailable",
        _ => "error",
    }
}

fn finish<T>(method: &'static str, result: LedgerResult<T>) -> Result<T, Status> {
    match result {
        Ok(value) => {
            GRPC_REQUESTS_TOTAL.with_label_values(&[method, "ok"]).inc();
            Ok(value)
        }
        Err(err) => Err(reject(method, err)),
    }
}

fn reject(method: &'static str, err: LedgerError) -> Status {
    record_error(&err);
    if !err.is(ErrorKind::SystemFailure) {
        warn!(method, error = %err, "Request rejected");
    }
    let status = Status::from(err);
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, status_label(status.code())])
        .inc();
    status
}

fn required<T>(field: Option<T>, name: &str) -> LedgerResult<T> {
    field.ok_or_else(|| {
        LedgerError::new(ErrorKind::BadDataSupplied).extend(format!("{} is required", name))
    })
}

/// Relay pipe batches to the client as converted messages. The job is
/// cancelled when the client goes away or the relay ends early.
fn forward<T, M, F>(
    method: &'static str,
    mut reader: PipeReader<T>,
    cancel: CancellationToken,
    convert: F,
) -> ResponseStream<M>
where
    T: Send + 'static,
    M: Send + 'static,
    F: Fn(Vec<T>) -> LedgerResult<M> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let _guard = cancel.drop_guard();
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[method])
            .start_timer();
        let mut batches = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => None,
                next = reader.read_result() => Some(next),
            };

            let Some(next) = next else {
                debug!(method, batches, "Client went away, canceling search");
                reader.close();
                GRPC_REQUESTS_TOTAL.with_label_values(&[method, "cancelled"]).inc();
                break;
            };

            let Some(batch) = next else {
                GRPC_REQUESTS_TOTAL.with_label_values(&[method, "ok"]).inc();
                break;
            };

            match batch.and_then(&convert) {
                Ok(message) => {
                    batches += 1;
                    if tx.send(Ok(message)).await.is_err() {
                        reader.close();
                        GRPC_REQUESTS_TOTAL.with_label_values(&[method, "cancelled"]).inc();
                        break;
                    }
                }
                Err(err) => {
                    let status = reject(method, err);
                    let _ = tx.send(Err(status)).await;
                    break;
                }
            }
        }

        timer.observe_duration();
        debug!(method, batches, "Search stream finished");
    });

    Box::pin(ReceiverStream::new(rx))
}

#[tonic::async_trait]
impl BookkeepingService for BookkeepingServiceImpl {
    type SearchLedgersStream = ResponseStream<SearchLedgersResponse>;
    type SearchAccountsStream = ResponseStream<SearchAccountsResponse>;
    type SearchTransactionsStream = ResponseStream<SearchTransactionsResponse>;
    type SearchTransactionEntriesStream = ResponseStream<SearchTransactionEntriesResponse>;

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "CreateLedger")
    )]
    async fn create_ledger(
        &self,
        request: Request<CreateLedgerRequest>,
    ) -> Result<Response<CreateLedgerResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.ledgers();

        let ledger = self
            .unary("CreateLedger", async move {
                let input = ledger_from_proto(required(req.ledger, "ledger")?)?;
                let ledger = store.create(&input).await?;
                Ok(ledger_to_proto(&ledger))
            })
            .await?;

        Ok(Response::new(CreateLedgerResponse {
            ledger: Some(ledger),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "SearchLedgers")
    )]
    async fn search_ledgers(
        &self,
        request: Request<SearchRequest>,
    ) -> Result<Response<Self::SearchLedgersStream>, Status> {
        let query = request.into_inner().query;
        let cancel = CancellationToken::new();
        let reader = self
            .ctx
            .ledgers()
            .search(&query, &cancel)
            .map_err(|e| reject("SearchLedgers", e))?;

        Ok(Response::new(forward(
            "SearchLedgers",
            reader,
            cancel,
            |ledgers| {
                Ok(SearchLedgersResponse {
                    ledgers: ledgers.iter().map(ledger_to_proto).collect(),
                })
            },
        )))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "UpdateLedger")
    )]
    async fn update_ledger(
        &self,
        request: Request<UpdateLedgerRequest>,
    ) -> Result<Response<UpdateLedgerResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.ledgers();

        let ledger = self
            .unary("UpdateLedger", async move {
                let data = DataMap::parse(&req.data)?;
                let ledger = store.update(&req.id, &data).await?;
                Ok(ledger_to_proto(&ledger))
            })
            .await?;

        Ok(Response::new(UpdateLedgerResponse {
            ledger: Some(ledger),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "CreateAccount")
    )]
    async fn create_account(
        &self,
        request: Request<CreateAccountRequest>,
    ) -> Result<Response<CreateAccountResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.accounts();

        let account = self
            .unary("CreateAccount", async move {
                let input = account_from_proto(required(req.account, "account")?)?;
                let account = store.create(&input).await?;
                account_to_proto(&account)
            })
            .await?;

        Ok(Response::new(CreateAccountResponse {
            account: Some(account),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "SearchAccounts")
    )]
    async fn search_accounts(
        &self,
        request: Request<SearchRequest>,
    ) -> Result<Response<Self::SearchAccountsStream>, Status> {
        let query = request.into_inner().query;
        let cancel = CancellationToken::new();
        let reader = self
            .ctx
            .accounts()
            .search(&query, &cancel)
            .map_err(|e| reject("SearchAccounts", e))?;

        Ok(Response::new(forward(
            "SearchAccounts",
            reader,
            cancel,
            |accounts| {
                Ok(SearchAccountsResponse {
                    accounts: accounts
                        .iter()
                        .map(account_to_proto)
                        .collect::<LedgerResult<Vec<_>>>()?,
                })
            },
        )))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "UpdateAccount")
    )]
    async fn update_account(
        &self,
        request: Request<UpdateAccountRequest>,
    ) -> Result<Response<UpdateAccountResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.accounts();

        let account = self
            .unary("UpdateAccount", async move {
                let data = DataMap::parse(&req.data)?;
                let account = store.update(&req.id, &data).await?;
                account_to_proto(&account)
            })
            .await?;

        Ok(Response::new(UpdateAccountResponse {
            account: Some(account),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "CreateTransaction")
    )]
    async fn create_transaction(
        &self,
        request: Request<CreateTransactionRequest>,
    ) -> Result<Response<CreateTransactionResponse>, Status> {
        let req = request.into_inner();
        let engine = self.ctx.posting();

        let transaction = self
            .unary("CreateTransaction", async move {
                let input = transaction_from_proto(required(req.transaction, "transaction")?)?;
                let posted = engine.post(&input).await?;
                transaction_to_proto(&posted)
            })
            .await?;

        info!(transaction_id = %transaction.id, "CreateTransaction completed");

        Ok(Response::new(CreateTransactionResponse {
            transaction: Some(transaction),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "SearchTransactions")
    )]
    async fn search_transactions(
        &self,
        request: Request<SearchRequest>,
    ) -> Result<Response<Self::SearchTransactionsStream>, Status> {
        let query = request.into_inner().query;
        let cancel = CancellationToken::new();
        let reader = self
            .ctx
            .transactions()
            .search(&query, &cancel)
            .map_err(|e| reject("SearchTransactions", e))?;

        Ok(Response::new(forward(
            "SearchTransactions",
            reader,
            cancel,
            |transactions| {
                Ok(SearchTransactionsResponse {
                    transactions: transactions
                        .iter()
                        .map(transaction_to_proto)
                        .collect::<LedgerResult<Vec<_>>>()?,
                })
            },
        )))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "SearchTransactionEntries")
    )]
    async fn search_transaction_entries(
        &self,
        request: Request<SearchRequest>,
    ) -> Result<Response<Self::SearchTransactionEntriesStream>, Status> {
        let query = request.into_inner().query;
        let cancel = CancellationToken::new();
        let reader = self
            .ctx
            .transactions()
            .search_entries(&query, &cancel)
            .map_err(|e| reject("SearchTransactionEntries", e))?;

        Ok(Response::new(forward(
            "SearchTransactionEntries",
            reader,
            cancel,
            |found| {
                Ok(SearchTransactionEntriesResponse {
                    entries: found
                        .iter()
                        .map(|e| entry_to_proto(&e.entry, &e.currency))
                        .collect::<LedgerResult<Vec<_>>>()?,
                })
            },
        )))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "UpdateTransaction")
    )]
    async fn update_transaction(
        &self,
        request: Request<UpdateTransactionRequest>,
    ) -> Result<Response<UpdateTransactionResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.transactions();

        let transaction = self
            .unary("UpdateTransaction", async move {
                let data = DataMap::parse(&req.data)?;
                let cleared_at = req.cleared_at.as_ref().map(from_timestamp).transpose()?;
                let updated = store.update(&req.id, &data, cleared_at).await?;
                transaction_to_proto(&updated)
            })
            .await?;

        Ok(Response::new(UpdateTransactionResponse {
            transaction: Some(transaction),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "bookkeeping-service", method = "ReverseTransaction")
    )]
    async fn reverse_transaction(
        &self,
        request: Request<ReverseTransactionRequest>,
    ) -> Result<Response<ReverseTransactionResponse>, Status> {
        let req = request.into_inner();
        let store = self.ctx.transactions();

        let transaction = self
            .unary("ReverseTransaction", async move {
                let reversal = store.reverse(&req.id).await?;
                transaction_to_proto(&reversal)
            })
            .await?;

        info!(transaction_id = %transaction.id, "ReverseTransaction completed");

        Ok(Response::new(ReverseTransactionResponse {
            transaction: Some(transaction),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{PipeWriter, WorkerPool};
    use futures::StreamExt;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(Code::NotFound), "not_found");
        assert_eq!(status_label(Code::Internal), "error");
    }

    #[test]
    fn test_missing_message_is_bad_data() {
        let err = required::<u32>(None, "ledger").unwrap_err();
        assert!(err.is(ErrorKind::BadDataSupplied));
        assert_eq!(err.detail(), Some("ledger is required"));
    }

    #[tokio::test]
    async fn test_forward_relays_batches_then_error() {
        let pool = WorkerPool::new(1, 1);
        let cancel = CancellationToken::new();
        let reader = pool.stream("numbers", &cancel, |writer: PipeWriter<u32>| async move {
            for i in 0..2u32 {
                if writer.write_result(vec![i, i]).await.is_err() {
                    return;
                }
            }
            writer
                .write_error(LedgerError::new(ErrorKind::SearchQueryResultsNotCasting))
                .await;
        });

        let stream = forward("Numbers", reader, cancel, |batch: Vec<u32>| {
            Ok(batch.iter().sum::<u32>())
        });
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(*items[0].as_ref().unwrap(), 0);
        assert_eq!(*items[1].as_ref().unwrap(), 2);
        assert_eq!(items[2].as_ref().unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_job() {
        let pool = WorkerPool::new(1, 1);
        let cancel = CancellationToken::new();
        let observed = cancel.clone();
        let reader = pool.stream("forever", &cancel, |writer: PipeWriter<u32>| async move {
            while writer.write_result(vec![1u32]).await.is_ok() {}
        });

        let mut stream = forward("Forever", reader, cancel, |batch: Vec<u32>| Ok(batch.len()));
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        drop(stream);

        tokio::time::timeout(std::time::Duration::from_secs(1), observed.cancelled())
            .await
            .expect("job should be canceled once the client is gone");
    }
}
