//! Request timestamps.
//!
//! The venue rejects signed requests whose timestamp is stale or not larger
//! than the previous one on the same key.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;

/// Source of request timestamps in unix milliseconds.
pub trait TimestampProvider: Send + Sync {
    /// The next timestamp. Must exceed every value returned before.
    fn next_timestamp(&self) -> u64;
}

/// Wall-clock milliseconds, bumped by one whenever two calls land in the same
/// millisecond or the clock steps backwards.
#[derive(Debug, Default)]
pub struct IncreasingTimestamp {
    last: AtomicU64,
}

impl IncreasingTimestamp {
    /// Create a new provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> u64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        u64::try_from(nanos / 1_000_000).unwrap_or_default()
    }
}

impl TimestampProvider for IncreasingTimestamp {
    fn next_timestamp(&self) -> u64 {
        let now = Self::now_millis();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}
