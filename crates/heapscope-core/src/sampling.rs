//! 1-in-N allocation sampling.
//!
//! One process-wide counter is shared by every producer thread. Each call
//! bumps it unconditionally and admits the notification when the
//! pre-increment value is a multiple of the interval, so the decision is
//! fair across threads regardless of their individual allocation rates.
//!
//! All state uses relaxed ordering. A reconfiguration is picked up by the
//! next call on any thread; nothing needs draining.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

pub struct SamplingPolicy {
    enabled: AtomicBool,
    interval: AtomicU32,
    counter: AtomicU64,
}

impl SamplingPolicy {
    #[must_use]
    pub const fn new(enabled: bool, interval: u32) -> Self {
        Self::with_counter(enabled, interval, 0)
    }

    /// Start from a known counter value, for reproducible decisions.
    #[must_use]
    pub const fn with_counter(enabled: bool, interval: u32, start: u64) -> Self {
        let interval = if interval == 0 { 1 } else { interval };
        Self {
            enabled: AtomicBool::new(enabled),
            interval: AtomicU32::new(interval),
            counter: AtomicU64::new(start),
        }
    }

    /// Decide whether the current allocation notification is recorded.
    #[inline]
    pub fn should_record(&self) -> bool {
        let seen = self.counter.fetch_add(1, Ordering::Relaxed);
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }
        let interval = u64::from(self.interval.load(Ordering::Relaxed).max(1));
        seen % interval == 0
    }

    /// Set the interval. Zero is treated as one.
    pub fn set_interval(&self, interval: u32) {
        self.interval.store(interval.max(1), Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn interval(&self) -> u32 {
        self.interval.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Total notifications seen, admitted or not.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::new(true, crate::config::DEFAULT_SAMPLING_INTERVAL)
    }
}

impl std::fmt::Debug for SamplingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingPolicy")
            .field("enabled", &self.is_enabled())
            .field("interval", &self.interval())
            .field("calls", &self.calls())
            .finish()
    }
}
