//! Bounded single-producer, single-consumer pipe of result batches.
//!
//! The producer blocks when the buffer is full. Cancelling the pipe's token,
//! or dropping the reader, makes pending and future writes fail with
//! `Canceled`.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{LedgerError, LedgerResult};

type Batch<T> = LedgerResult<Vec<T>>;

/// Create a pipe buffering up to `capacity` batches. The pipe is closed when
/// `parent` is cancelled.
pub fn pipe<T>(capacity: usize, parent: &CancellationToken) -> (PipeWriter<T>, PipeReader<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = parent.child_token();
    (
        PipeWriter {
            tx,
            cancel: cancel.clone(),
        },
        PipeReader {
            rx,
            cancel,
            done: false,
        },
    )
}

/// Producer end.
pub struct PipeWriter<T> {
    tx: mpsc::Sender<Batch<T>>,
    cancel: CancellationToken,
}

impl<T> PipeWriter<T> {
    /// Deliver one batch, waiting for buffer space.
    pub async fn write_result(&self, batch: Vec<T>) -> LedgerResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LedgerError::canceled()),
            sent = self.tx.send(Ok(batch)) => sent.map_err(|_| LedgerError::canceled()),
        }
    }

    /// Deliver an error and close the pipe.
    pub async fn write_error(self, err: LedgerError) {
        let message = err.to_string();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(error = %message, "Pipe canceled before error was delivered");
            }
            sent = self.tx.send(Err(err)) => {
                if sent.is_err() {
                    tracing::debug!("Pipe reader gone before error was delivered");
                }
            }
        }
    }

    /// True once the consumer has gone away or the pipe was canceled.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Consumer end. Dropping it cancels the producer.
#[derive(Debug)]
pub struct PipeReader<T> {
    rx: mpsc::Receiver<Batch<T>>,
    cancel: CancellationToken,
    done: bool,
}

impl<T> PipeReader<T> {
    /// Next batch in FIFO order. `None` means the pipe is closed. A
    /// cancellation is reported once as `Canceled`, after which the pipe is
    /// closed.
    pub async fn read_result(&mut self) -> Option<Batch<T>> {
        if self.done {
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(Err(LedgerError::canceled())),
            item = self.rx.recv() => item,
        };

        match next {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(err)) => {
                self.close();
                Some(Err(err))
            }
            None => {
                self.close();
                None
            }
        }
    }

    /// Cancel the producer and stop reading.
    pub fn close(&mut self) {
        self.done = true;
        self.cancel.cancel();
        self.rx.close();
    }
}

impl<T> Drop for PipeReader<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
