//! Runs a compiled search on the worker pool and streams its pages.

use std::future::Future;

use sqlx::postgres::PgRow;
use sqlx::FromRow;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::jobs::{PipeReader, PipeWriter};
use crate::search::SearchSqlQuery;
use crate::services::metrics::{DB_QUERY_DURATION, SEARCH_BATCHES_TOTAL};

/// Postgres SQLSTATEs raised when a `data` value does not cast to the type a
/// search compares it as.
const CAST_FAILURES: &[&str] = &["22P02", "22007", "22008", "22003"];

/// Map a search failure, separating bad casts from store faults.
pub fn search_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err
            .code()
            .map(|code| CAST_FAILURES.contains(&code.as_ref()))
            .unwrap_or(false)
        {
            return LedgerError::new(ErrorKind::SearchQueryResultsNotCasting).with_source(err);
        }
    }
    LedgerError::from(err)
}

/// Page through `query` on a pool worker, converting each page with
/// `convert` and writing it to the returned pipe. An empty page ends the
/// stream without emitting a batch.
pub fn stream_search<R, T, F, Fut>(
    ctx: &Context,
    job: &'static str,
    query: SearchSqlQuery,
    cancel: &CancellationToken,
    convert: F,
) -> PipeReader<T>
where
    R: for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
    T: Send + 'static,
    F: Fn(Vec<R>) -> Fut + Send + 'static,
    Fut: Future<Output = LedgerResult<Vec<T>>> + Send,
{
    query.trace(ctx.config.trace_queries);
    let pool = ctx.db.reader().clone();

    ctx.workers
        .stream(job, cancel, move |writer: PipeWriter<T>| async move {
            let namespace = query.namespace.as_str();
            let mut paging = query.paging();

            while paging.can_load() {
                let timer = DB_QUERY_DURATION.with_label_values(&[job]).start_timer();
                let fetched = tokio::select! {
                    biased;
                    _ = writer.token().cancelled() => {
                        tracing::debug!(namespace, "Search canceled");
                        return;
                    }
                    rows = query.page_query::<R>(&paging).fetch_all(&pool) => rows,
                };
                timer.observe_duration();

                let rows = match fetched {
                    Ok(rows) => rows,
                    Err(e) => {
                        let err = search_error(e);
                        tracing::warn!(namespace, error = %err, "Search page failed");
                        writer.write_error(err).await;
                        return;
                    }
                };

                let count = rows.len() as i64;
                if count == 0 {
                    break;
                }

                let batch = match convert(rows).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        writer.write_error(err).await;
                        return;
                    }
                };
                if writer.write_result(batch).await.is_err() {
                    return;
                }
                SEARCH_BATCHES_TOTAL.with_label_values(&[namespace]).inc();

                if paging.stop(count) {
                    break;
                }
            }

            tracing::debug!(namespace, loaded = paging.loaded(), "Search finished");
        })
}
