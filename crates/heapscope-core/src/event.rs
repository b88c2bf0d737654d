//! Events carried from producer call-sites to the consumer.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::runtime::OwnedHandle;

/// One captured stack frame: an opaque method id and a location within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StackFrame {
    pub method: u64,
    pub location: i64,
}

/// Captured frames, innermost first.
pub type CallStack = Vec<StackFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EventKind {
    Alloc,
    Free,
    GcStart,
    GcFinish,
}

impl EventKind {
    #[must_use]
    pub const fn is_gc(self) -> bool {
        matches!(self, Self::GcStart | Self::GcFinish)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alloc => "alloc",
            Self::Free => "free",
            Self::GcStart => "gc_start",
            Self::GcFinish => "gc_finish",
        }
    }
}

/// A single fact pushed through the event channel.
///
/// The event owns its handles and stack copy independently of any ledger
/// record. Dropping it releases them.
#[derive(Debug)]
pub struct Event {
    pub kind: EventKind,
    /// Allocation identity; zero for GC events.
    pub identity: u64,
    /// Bytes; zero for GC events.
    pub size: u64,
    pub timestamp_ms: u64,
    pub thread_id: u64,
    pub type_handle: Option<OwnedHandle>,
    pub thread_handle: Option<OwnedHandle>,
    pub call_stack: CallStack,
}

impl Event {
    #[must_use]
    pub fn alloc(
        identity: u64,
        size: u64,
        timestamp_ms: u64,
        thread_id: u64,
        type_handle: Option<OwnedHandle>,
        thread_handle: Option<OwnedHandle>,
        call_stack: CallStack,
    ) -> Self {
        Self {
            kind: EventKind::Alloc,
            identity,
            size,
            timestamp_ms,
            thread_id,
            type_handle,
            thread_handle,
            call_stack,
        }
    }

    #[must_use]
    pub fn free(identity: u64, size: u64, timestamp_ms: u64, thread_id: u64) -> Self {
        Self {
            kind: EventKind::Free,
            identity,
            size,
            timestamp_ms,
            thread_id,
            type_handle: None,
            thread_handle: None,
            call_stack: CallStack::new(),
        }
    }

    #[must_use]
    pub fn gc(kind: EventKind, timestamp_ms: u64) -> Self {
        debug_assert!(kind.is_gc());
        Self {
            kind,
            identity: 0,
            size: 0,
            timestamp_ms,
            thread_id: current_thread_id(),
            type_handle: None,
            thread_handle: None,
            call_stack: CallStack::new(),
        }
    }
}

/// Wall-clock milliseconds that never go backwards for a given clock.
#[derive(Debug, Default)]
pub struct EpochClock {
    last: AtomicU64,
}

impl EpochClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Milliseconds since the Unix epoch, clamped to the latest value handed out.
    pub fn now_ms(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let prev = self.last.fetch_max(wall, Ordering::Relaxed);
        prev.max(wall)
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Process-local id of the calling thread.
///
/// Drawn from a counter the first time a thread asks and never reused after
/// the thread exits. This is not the kernel's thread id.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| {
        let mut value = id.get();
        if value == 0 {
            value = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            id.set(value);
        }
        value
    })
}
