//! Bounded worker pool for background jobs.
//!
//! Unary jobs and stream producers draw from separate permit sets. A
//! producer parked on a full pipe holds its permit until the reader drains
//! or goes away, so it must never take a slot a unary job is waiting for.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{LedgerError, LedgerResult};
use crate::jobs::pipe::{pipe, PipeReader, PipeWriter};

/// At most `size` unary jobs and `size` stream producers run at once; the
/// rest wait for a slot of their own kind.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    stream_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    size: usize,
    pipe_capacity: usize,
}

impl WorkerPool {
    pub fn new(size: usize, pipe_capacity: usize) -> Self {
        let size = size.max(1);
        tracing::info!(worker_count = size, pipe_capacity, "Starting worker pool");
        Self {
            permits: Arc::new(Semaphore::new(size)),
            stream_permits: Arc::new(Semaphore::new(size)),
            shutdown: CancellationToken::new(),
            size,
            pipe_capacity: pipe_capacity.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Idle slots for unary jobs.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Idle slots for stream producers.
    pub fn available_streams(&self) -> usize {
        self.stream_permits.available_permits()
    }

    /// Token cancelled when the pool shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Queue a job. It is dropped without running if the pool shuts down
    /// first, and aborted at its next yield point if it shuts down mid-run.
    pub fn submit<F>(&self, job: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_on(self.permits.clone(), job, work)
    }

    fn spawn_on<F>(&self, permits: Arc<Semaphore>, job: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let span = tracing::info_span!("job", job = job);

        tokio::spawn(
            async move {
                let _permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Job aborted by pool shutdown");
                    }
                    _ = work => {}
                }
            }
            .instrument(span),
        )
    }

    /// Run a job on the pool and wait for its result.
    pub async fn run<F, T>(&self, job: &'static str, work: F) -> LedgerResult<T>
    where
        F: Future<Output = LedgerResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(job, async move {
            let _ = tx.send(work.await);
        });
        rx.await.unwrap_or_else(|_| Err(LedgerError::canceled()))
    }

    /// Start a producer job writing into a new pipe and hand back the reader.
    /// The pipe closes when `cancel` or the pool is cancelled, or when the
    /// reader is dropped.
    pub fn stream<T, F, Fut>(
        &self,
        job: &'static str,
        cancel: &CancellationToken,
        producer: F,
    ) -> PipeReader<T>
    where
        T: Send + 'static,
        F: FnOnce(PipeWriter<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (writer, reader) = pipe(self.pipe_capacity, &self.shutdown);
        let caller = cancel.clone();
        let pipe_token = writer.token().clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => pipe_token.cancel(),
                _ = pipe_token.cancelled() => {}
            }
        });

        self.spawn_on(self.stream_permits.clone(), job, producer(writer));
        reader
    }

    /// Stop accepting work and cancel everything in flight.
    pub fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown.cancel();
        self.permits.close();
        self.stream_permits.close();
    }
}
