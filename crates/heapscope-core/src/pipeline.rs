//! The pipeline context: owns every component and exposes the notification
//! entry points the runtime instrumentation calls.
//!
//! Producer path for an allocation:
//! active check → sampling gate → stack capture → ledger insert → best-effort
//! channel push. The free path removes from the ledger and enqueues a free
//! event only when the identity was tracked. Nothing on either path blocks
//! except the amortised O(1) ledger shard lock, and nothing reports failure back to
//! the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::channel::EventChannel;
use crate::config::PipelineConfig;
use crate::consumer::{ConsumerStats, ConsumerStatus, EventConsumer};
use crate::control::ControlSurface;
use crate::error::PipelineError;
use crate::event::{EpochClock, Event, EventKind, current_thread_id};
use crate::ledger::{AllocationLedger, AllocationRecord};
use crate::runtime::{EventObserver, OwnedHandle, RuntimeBridge, ThreadRef, TypeRef};
use crate::summary::LedgerSummary;
use crate::sampling::SamplingPolicy;

/// Drops are logged on the first occurrence and then once per this many.
const DROP_LOG_EVERY: u64 = 4096;

/// State shared by producers, the consumer and control handles.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) sampling: SamplingPolicy,
    pub(crate) channel: Arc<EventChannel<Event>>,
    pub(crate) ledger: AllocationLedger,
    pub(crate) consumer_status: Arc<ConsumerStatus>,
    active: Arc<AtomicBool>,
    dropped: AtomicU64,
    pub(crate) clock: EpochClock,
    /// Untruncated summary from the previous `snapshot` command.
    pub(crate) last_snapshot: Mutex<Option<LedgerSummary>>,
    bridge: Arc<dyn RuntimeBridge>,
}

impl Shared {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clear the active flag. Only the first caller logs.
    pub(crate) fn request_stop(&self, reason: &'static str) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::info!(reason, "pipeline stopping");
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Best-effort push. A rejected event is counted and released here.
    fn enqueue(&self, event: Event) {
        if let Err(rejected) = self.channel.push(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % DROP_LOG_EVERY == 0 {
                tracing::warn!(
                    dropped_total = total,
                    kind = rejected.kind.as_str(),
                    capacity = self.channel.capacity(),
                    "event channel full, dropping event"
                );
            }
        }
    }
}

pub struct Pipeline {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<ConsumerStats>>>,
}

impl Pipeline {
    /// Validate `config`, build every component and start the consumer.
    pub fn start(
        config: PipelineConfig,
        bridge: Arc<dyn RuntimeBridge>,
    ) -> Result<Self, PipelineError> {
        Self::with_observer(config, bridge, None)
    }

    /// As [`start`](Self::start), with an observer invoked on the consumer
    /// thread for every event.
    pub fn with_observer(
        config: PipelineConfig,
        bridge: Arc<dyn RuntimeBridge>,
        observer: Option<Arc<dyn EventObserver>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let channel = Arc::new(EventChannel::new(config.channel_capacity));
        let active = Arc::new(AtomicBool::new(true));
        let consumer_status = Arc::new(ConsumerStatus::new());

        let consumer = EventConsumer::new(
            Arc::clone(&channel),
            Arc::clone(&active),
            Arc::clone(&consumer_status),
            observer,
            config.idle_sleep,
        );
        let handle = consumer.spawn(&config.thread_name)?;

        tracing::info!(
            sampling_enabled = config.sampling_enabled,
            sampling_interval = config.sampling_interval,
            channel_capacity = config.channel_capacity,
            ledger_shards = config.ledger_shards,
            "pipeline started"
        );

        let shared = Arc::new(Shared {
            sampling: SamplingPolicy::new(config.sampling_enabled, config.sampling_interval),
            ledger: AllocationLedger::new(config.ledger_shards, config.expected_population),
            channel,
            consumer_status,
            active,
            dropped: AtomicU64::new(0),
            clock: EpochClock::new(),
            last_snapshot: Mutex::new(None),
            bridge,
            config,
        });

        Ok(Self {
            shared,
            consumer: Mutex::new(Some(handle)),
        })
    }

    /// An object was allocated. Returns whether it was recorded.
    pub fn notify_alloc(
        &self,
        identity: u64,
        size: u64,
        type_ref: TypeRef,
        thread_ref: ThreadRef,
    ) -> bool {
        let shared = &*self.shared;
        if !shared.is_active() || !shared.sampling.should_record() {
            return false;
        }

        let depth = shared.config.max_stack_depth;
        let mut call_stack = shared.bridge.capture_stack(depth);
        call_stack.truncate(depth);
        let timestamp_ms = shared.clock.now_ms();
        let thread_id = current_thread_id();
        let event_stack = call_stack.clone();

        shared.ledger.insert(AllocationRecord {
            identity,
            size,
            timestamp_ms,
            type_ref,
            thread_ref,
            call_stack,
            thread_id,
        });

        shared.enqueue(Event::alloc(
            identity,
            size,
            timestamp_ms,
            thread_id,
            OwnedHandle::promote(&shared.bridge, type_ref.0),
            OwnedHandle::promote(&shared.bridge, thread_ref.0),
            event_stack,
        ));
        true
    }

    /// An object was reclaimed. Returns whether it had been tracked.
    pub fn notify_free(&self, identity: u64) -> bool {
        let shared = &*self.shared;
        if !shared.is_active() {
            return false;
        }
        let Some(record) = shared.ledger.remove(identity) else {
            return false;
        };
        shared.enqueue(Event::free(
            identity,
            record.size,
            shared.clock.now_ms(),
            current_thread_id(),
        ));
        true
    }

    pub fn notify_gc_start(&self) {
        self.notify_gc(EventKind::GcStart);
    }

    pub fn notify_gc_finish(&self) {
        self.notify_gc(EventKind::GcFinish);
    }

    fn notify_gc(&self, kind: EventKind) {
        let shared = &*self.shared;
        if shared.is_active() {
            shared.enqueue(Event::gc(kind, shared.clock.now_ms()));
        }
    }

    /// The runtime is going away: stop admitting events.
    pub fn notify_shutdown(&self) {
        self.shared.request_stop("runtime shutdown");
    }

    #[must_use]
    pub fn control(&self) -> ControlSurface {
        ControlSurface::new(Arc::clone(&self.shared))
    }

    #[must_use]
    pub fn ledger(&self) -> &AllocationLedger {
        &self.shared.ledger
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Stop admitting events, wait for the consumer to drain and return its
    /// final totals. Later calls return the same totals without waiting.
    pub fn shutdown(&self) -> ConsumerStats {
        self.shared.request_stop("shutdown");
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("event consumer panicked during shutdown");
            }
        }
        self.shared.consumer_status.stats()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
        let released = self.shared.ledger.clear();
        tracing::debug!(released, "ledger cleared");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("active", &self.is_active())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerState;
    use crate::runtime::DetachedRuntime;

    fn record_everything() -> PipelineConfig {
        PipelineConfig {
            sampling_enabled: false,
            channel_capacity: 1024,
            ..PipelineConfig::default()
        }
    }

    fn start(config: PipelineConfig) -> Pipeline {
        Pipeline::start(config, Arc::new(DetachedRuntime)).expect("pipeline starts")
    }

    #[test]
    fn alloc_then_free_round_trip() {
        let pipeline = start(record_everything());
        assert!(pipeline.notify_alloc(42, 4096, TypeRef(1), ThreadRef(2)));

        let record = pipeline.ledger().find(42).expect("tracked");
        assert_eq!(record.size, 4096);
        assert_eq!(record.type_ref, TypeRef(1));

        assert!(pipeline.notify_free(42));
        assert!(pipeline.ledger().find(42).is_none());
        assert!(!pipeline.notify_free(42));

        let stats = pipeline.shutdown();
        assert_eq!(stats.allocs, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(pipeline.control().stats_array(), [4096, 4096, 0, 1, 1]);
    }

    #[test]
    fn sampling_gates_allocations() {
        let pipeline = start(PipelineConfig {
            sampling_enabled: true,
            sampling_interval: 4,
            ..record_everything()
        });

        let recorded = (0..40_u64)
            .filter(|id| pipeline.notify_alloc(id * 8 + 8, 16, TypeRef(1), ThreadRef(1)))
            .count();
        assert_eq!(recorded, 10);
        assert_eq!(pipeline.ledger().len(), 10);
    }

    #[test]
    fn stopped_pipeline_admits_nothing() {
        let pipeline = start(record_everything());
        pipeline.notify_alloc(8, 8, TypeRef(1), ThreadRef(1));
        pipeline.notify_shutdown();

        assert!(!pipeline.is_active());
        assert!(!pipeline.notify_alloc(16, 8, TypeRef(1), ThreadRef(1)));
        assert!(!pipeline.notify_free(8));
        pipeline.notify_gc_start();

        let stats = pipeline.shutdown();
        assert_eq!(stats.processed, 1);
        assert_eq!(pipeline.control().consumer_state(), ConsumerState::Stopped);
    }

    #[test]
    fn free_of_untracked_identity_is_silent() {
        let pipeline = start(record_everything());
        let before = pipeline.control().stats();
        assert!(!pipeline.notify_free(0xDEAD_0000));
        assert_eq!(pipeline.control().stats(), before);
        assert_eq!(pipeline.control().dropped_events(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pipeline = start(record_everything());
        pipeline.notify_gc_start();
        pipeline.notify_gc_finish();
        let first = pipeline.shutdown();
        let second = pipeline.shutdown();
        assert_eq!(first, second);
        assert_eq!(first.gc_starts, 1);
        assert_eq!(first.gc_finishes, 1);
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let err = Pipeline::start(
            PipelineConfig {
                channel_capacity: 0,
                ..PipelineConfig::default()
            },
            Arc::new(DetachedRuntime),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }
}
