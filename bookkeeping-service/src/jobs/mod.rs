//! Worker pool and the job pipe used to stream search results.

mod pipe;
mod pool;

pub use pipe::{pipe, PipeReader, PipeWriter};
pub use pool::WorkerPool;
