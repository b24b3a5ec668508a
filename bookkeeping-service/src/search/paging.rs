//! Offset paging cursor shared by every search stream.

/// Page size when the query does not give one.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Upper bound on rows fetched per round trip.
pub const DEFAULT_SYSTEM_BATCH_SIZE: i64 = 50;

/// Walks `[offset, offset + limit)` in batches of at most `batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: i64,
    pub limit: i64,
    pub batch_size: i64,
    loaded: i64,
}

impl Paging {
    pub fn new(from: i64, size: i64, system_batch_size: i64) -> Self {
        let limit = if size > 0 { size } else { DEFAULT_PAGE_SIZE };
        let system_batch_size = if system_batch_size > 0 {
            system_batch_size
        } else {
            DEFAULT_SYSTEM_BATCH_SIZE
        };
        Self {
            offset: from.max(0),
            limit,
            batch_size: limit.min(system_batch_size),
            loaded: 0,
        }
    }

    /// Whether another batch should be fetched.
    pub fn can_load(&self) -> bool {
        self.batch_size > 0 && self.loaded < self.limit
    }

    /// Record a fetched batch of `loaded` rows. Returns true when paging is
    /// finished: the batch came back short or the limit has been reached.
    pub fn stop(&mut self, loaded: i64) -> bool {
        self.offset += loaded;
        self.loaded += loaded;

        let residual = self.limit - self.loaded;
        if loaded < self.batch_size || residual <= 0 {
            self.batch_size = 0;
            return true;
        }

        self.batch_size = self.batch_size.min(residual);
        false
    }

    /// Rows delivered so far.
    pub fn loaded(&self) -> i64 {
        self.loaded
    }
}
