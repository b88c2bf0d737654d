//! Stand-in for an instrumented managed runtime.

use std::sync::atomic::{AtomicU64, Ordering};

use heapscope_core::{CallStack, RuntimeBridge, StackFrame};

/// Frames fabricated per captured stack, before the depth cap.
const SYNTHETIC_FRAMES: usize = 12;

/// Bridge that hands out sequential durable references and counts how many
/// are still outstanding.
#[derive(Debug, Default)]
pub struct SyntheticRuntime {
    next_durable: AtomicU64,
    promoted: AtomicU64,
    released: AtomicU64,
    captures: AtomicU64,
}

impl SyntheticRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn promoted(&self) -> u64 {
        self.promoted.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Promoted references not yet released.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.promoted().saturating_sub(self.released())
    }

    #[must_use]
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }
}

impl RuntimeBridge for SyntheticRuntime {
    fn promote(&self, _handle: u64) -> Option<u64> {
        self.promoted.fetch_add(1, Ordering::AcqRel);
        Some(self.next_durable.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn release(&self, _durable: u64) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    fn capture_stack(&self, max_depth: usize) -> CallStack {
        let n = self.captures.fetch_add(1, Ordering::Relaxed);
        (0..SYNTHETIC_FRAMES.min(max_depth))
            .map(|depth| StackFrame {
                method: 0x7f00_0000 + ((n % 64) << 8) + depth as u64,
                location: depth as i64 * 4,
            })
            .collect()
    }
}
