//! Capability interface to the instrumented runtime.
//!
//! The pipeline never calls into the runtime through globals. Everything it
//! needs (durable references to runtime-owned handles and stack capture) is
//! reached through a [`RuntimeBridge`] injected at construction, which also
//! lets tests substitute a counting double.

use std::fmt;
use std::sync::Arc;

use crate::event::{CallStack, Event};

/// Borrowed handle to the runtime type of an allocated value.
///
/// Owned by the runtime. The pipeline copies it around but never releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize)]
pub struct TypeRef(pub u64);

/// Borrowed handle to the runtime thread that performed an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub struct ThreadRef(pub u64);

impl TypeRef {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl ThreadRef {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Services the pipeline requires from the managed runtime.
///
/// Implementations are called from arbitrary producer threads inside the
/// runtime's allocation path and from the consumer thread, so every method
/// must be bounded-time and must not call back into the pipeline.
pub trait RuntimeBridge: Send + Sync {
    /// Turn a callback-scoped handle into a durable reference.
    ///
    /// Returns `None` when the handle is null or the runtime refuses.
    fn promote(&self, handle: u64) -> Option<u64>;

    /// Release a reference previously returned by [`promote`](Self::promote).
    fn release(&self, durable: u64);

    /// Capture the calling thread's stack, at most `max_depth` frames.
    /// An empty stack signals failure.
    fn capture_stack(&self, max_depth: usize) -> CallStack;
}

/// Durable runtime reference held by an in-flight event.
///
/// Released through its bridge exactly once, on drop.
pub struct OwnedHandle {
    durable: u64,
    bridge: Arc<dyn RuntimeBridge>,
}

impl OwnedHandle {
    /// Promote `handle` through `bridge`. Null handles produce `None`.
    #[must_use]
    pub fn promote(bridge: &Arc<dyn RuntimeBridge>, handle: u64) -> Option<Self> {
        if handle == 0 {
            return None;
        }
        let durable = bridge.promote(handle)?;
        Some(Self {
            durable,
            bridge: Arc::clone(bridge),
        })
    }

    #[must_use]
    pub fn raw(&self) -> u64 {
        self.durable
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.bridge.release(self.durable);
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.durable).finish()
    }
}

/// Receives every event after the consumer has accounted for it.
///
/// Runs on the consumer thread; a slow observer delays draining but never
/// blocks producers.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventObserver for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event);
    }
}

/// Bridge for runs with no runtime attached: handles pass through unchanged
/// and stacks are never captured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedRuntime;

impl RuntimeBridge for DetachedRuntime {
    fn promote(&self, handle: u64) -> Option<u64> {
        Some(handle)
    }

    fn release(&self, _durable: u64) {}

    fn capture_stack(&self, _max_depth: usize) -> CallStack {
        CallStack::new()
    }
}
