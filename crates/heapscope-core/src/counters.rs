//! Process-wide allocation counters.
//!
//! Each field is an independent relaxed atomic. Readers may observe a brief
//! skew between fields (say, `total_allocated` updated before
//! `current_usage`); the values converge once in-flight updates finish.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic byte and count totals maintained by the ledger.
pub struct AggregateCounters {
    /// Bytes ever recorded as allocated.
    pub total_allocated: AtomicU64,
    /// Bytes ever recorded as freed.
    pub total_freed: AtomicU64,
    /// Bytes currently live.
    pub current_usage: AtomicU64,
    /// Allocations recorded.
    pub alloc_count: AtomicU64,
    /// Frees recorded.
    pub free_count: AtomicU64,
}

impl AggregateCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_allocated: AtomicU64::new(0),
            total_freed: AtomicU64::new(0),
            current_usage: AtomicU64::new(0),
            alloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_alloc(&self, size: u64) {
        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        self.current_usage.fetch_add(size, Ordering::Relaxed);
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, size: u64) {
        self.total_freed.fetch_add(size, Ordering::Relaxed);
        self.current_usage.fetch_sub(size, Ordering::Relaxed);
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            total_freed: self.total_freed.load(Ordering::Relaxed),
            current_usage: self.current_usage.load(Ordering::Relaxed),
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for AggregateCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AggregateCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time copy of [`AggregateCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub total_allocated: u64,
    pub total_freed: u64,
    pub current_usage: u64,
    pub alloc_count: u64,
    pub free_count: u64,
}

impl StatsSnapshot {
    /// The fixed five-integer statistics vector, in wire order:
    /// allocated, freed, current usage, alloc count, free count.
    #[must_use]
    pub const fn to_array(self) -> [u64; 5] {
        [
            self.total_allocated,
            self.total_freed,
            self.current_usage,
            self.alloc_count,
            self.free_count,
        ]
    }

    #[must_use]
    pub const fn net_allocated(self) -> i128 {
        self.total_allocated as i128 - self.total_freed as i128
    }

    /// How closely `current_usage` agrees with `allocated - freed`, as a
    /// percentage. 100 when nothing has been allocated yet.
    #[must_use]
    pub fn accuracy_percent(self) -> f64 {
        if self.total_allocated == 0 {
            return 100.0;
        }
        let drift = (self.net_allocated() - i128::from(self.current_usage)).unsigned_abs();
        100.0 - (drift as f64 / self.total_allocated as f64 * 100.0)
    }
}
