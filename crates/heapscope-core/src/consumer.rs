//! Background drain of the event channel.
//!
//! One consumer thread exists per pipeline. While the pipeline is active it
//! pops events, accounts for them, hands them to the optional observer and
//! drops them, which releases the runtime handles and stack copy each event
//! owns. When the channel is empty it sleeps for the configured idle period.
//!
//! Once the active flag clears, the consumer enters `Draining`, keeps
//! popping until the channel reports empty once, then stops. A producer
//! that publishes after that final empty observation is not seen; this
//! shutdown race is accepted.
//!
//! A panicking observer does not take the consumer down: the panic is
//! caught per event, counted in `observer_panics`, and the drain goes on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::EventChannel;
use crate::event::{Event, EventKind};
use crate::runtime::EventObserver;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ConsumerState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ConsumerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Totals accumulated by the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerStats {
    pub processed: u64,
    pub allocs: u64,
    pub frees: u64,
    pub gc_starts: u64,
    pub gc_finishes: u64,
    /// Sum of GcStart→GcFinish spans, in milliseconds.
    pub gc_time_ms: u64,
    /// Polls that found the channel empty.
    pub idle_polls: u64,
    /// Observer calls that panicked.
    pub observer_panics: u64,
}

/// Consumer progress, shared with readers on other threads.
#[derive(Debug)]
pub struct ConsumerStatus {
    state: AtomicU8,
    processed: AtomicU64,
    allocs: AtomicU64,
    frees: AtomicU64,
    gc_starts: AtomicU64,
    gc_finishes: AtomicU64,
    gc_time_ms: AtomicU64,
    idle_polls: AtomicU64,
    observer_panics: AtomicU64,
}

impl ConsumerStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConsumerState::Running as u8),
            processed: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            gc_starts: AtomicU64::new(0),
            gc_finishes: AtomicU64::new(0),
            gc_time_ms: AtomicU64::new(0),
            idle_polls: AtomicU64::new(0),
            observer_panics: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.processed.load(Ordering::Relaxed),
            allocs: self.allocs.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            gc_starts: self.gc_starts.load(Ordering::Relaxed),
            gc_finishes: self.gc_finishes.load(Ordering::Relaxed),
            gc_time_ms: self.gc_time_ms.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            observer_panics: self.observer_panics.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConsumerStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the consumer `Stopped` however `run` exits, unwinding included.
struct StopOnExit(Arc<ConsumerStatus>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.set_state(ConsumerState::Stopped);
    }
}

/// The drain loop and everything it reads.
pub struct EventConsumer {
    channel: Arc<EventChannel<Event>>,
    active: Arc<AtomicBool>,
    status: Arc<ConsumerStatus>,
    observer: Option<Arc<dyn EventObserver>>,
    idle_sleep: Duration,
    /// Timestamp of an unmatched GcStart.
    gc_open_since: Option<u64>,
}

impl EventConsumer {
    #[must_use]
    pub fn new(
        channel: Arc<EventChannel<Event>>,
        active: Arc<AtomicBool>,
        status: Arc<ConsumerStatus>,
        observer: Option<Arc<dyn EventObserver>>,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            channel,
            active,
            status,
            observer,
            idle_sleep,
            gc_open_since: None,
        }
    }

    /// Run the loop on a named OS thread.
    pub fn spawn(self, name: &str) -> std::io::Result<JoinHandle<ConsumerStats>> {
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || self.run())
    }

    /// Drain until the active flag clears, then drain what is left.
    pub fn run(mut self) -> ConsumerStats {
        self.status.set_state(ConsumerState::Running);
        let stop_guard = StopOnExit(Arc::clone(&self.status));
        tracing::debug!("event consumer running");

        while self.active.load(Ordering::Acquire) {
            match self.channel.pop() {
                Some(event) => self.dispatch(event),
                None => {
                    self.status.idle_polls.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(self.idle_sleep);
                }
            }
        }

        self.status.set_state(ConsumerState::Draining);
        let mut drained = 0_u64;
        while let Some(event) = self.channel.pop() {
            self.dispatch(event);
            drained += 1;
        }

        drop(stop_guard);
        let stats = self.status.stats();
        tracing::info!(
            drained,
            processed = stats.processed,
            gc_cycles = stats.gc_finishes,
            observer_panics = stats.observer_panics,
            "event consumer stopped"
        );
        stats
    }

    fn dispatch(&mut self, event: Event) {
        let status = &self.status;
        match event.kind {
            EventKind::Alloc => {
                status.allocs.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Free => {
                status.frees.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::GcStart => {
                status.gc_starts.fetch_add(1, Ordering::Relaxed);
                self.gc_open_since = Some(event.timestamp_ms);
                tracing::debug!(timestamp_ms = event.timestamp_ms, "gc start");
            }
            EventKind::GcFinish => {
                status.gc_finishes.fetch_add(1, Ordering::Relaxed);
                let elapsed = self
                    .gc_open_since
                    .take()
                    .map_or(0, |start| event.timestamp_ms.saturating_sub(start));
                status.gc_time_ms.fetch_add(elapsed, Ordering::Relaxed);
                tracing::debug!(
                    timestamp_ms = event.timestamp_ms,
                    elapsed_ms = elapsed,
                    "gc finish"
                );
            }
        }

        if let Some(observer) = &self.observer {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            if outcome.is_err() {
                let total = status.observer_panics.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    kind = event.kind.as_str(),
                    identity = event.identity,
                    total,
                    "event observer panicked"
                );
            }
        }
        status.processed.fetch_add(1, Ordering::Relaxed);
        // Handles and the stack copy are released here, once.
        drop(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn consumer_with(
        channel: &Arc<EventChannel<Event>>,
        active: bool,
        observer: Option<Arc<dyn EventObserver>>,
    ) -> (EventConsumer, Arc<ConsumerStatus>) {
        let status = Arc::new(ConsumerStatus::new());
        let consumer = EventConsumer::new(
            Arc::clone(channel),
            Arc::new(AtomicBool::new(active)),
            Arc::clone(&status),
            observer,
            Duration::from_micros(50),
        );
        (consumer, status)
    }

    #[test]
    fn inactive_consumer_drains_and_stops() {
        let channel = Arc::new(EventChannel::new(16));
        channel.push(Event::free(1, 8, 10, 1)).unwrap();
        channel.push(Event::gc(EventKind::GcStart, 100)).unwrap();
        channel.push(Event::gc(EventKind::GcFinish, 130)).unwrap();

        let (consumer, status) = consumer_with(&channel, false, None);
        let stats = consumer.run();

        assert_eq!(status.state(), ConsumerState::Stopped);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.gc_starts, 1);
        assert_eq!(stats.gc_finishes, 1);
        assert_eq!(stats.gc_time_ms, 30);
        assert!(channel.is_empty());
    }

    #[test]
    fn unmatched_gc_finish_adds_no_time() {
        let channel = Arc::new(EventChannel::new(4));
        channel.push(Event::gc(EventKind::GcFinish, 500)).unwrap();
        let (consumer, _) = consumer_with(&channel, false, None);
        assert_eq!(consumer.run().gc_time_ms, 0);
    }

    #[test]
    fn observer_sees_events_in_order() {
        let seen: Arc<Mutex<Vec<(EventKind, u64)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn EventObserver> =
            Arc::new(move |event: &Event| sink.lock().push((event.kind, event.identity)));

        let channel = Arc::new(EventChannel::new(8));
        channel.push(Event::free(11, 1, 0, 1)).unwrap();
        channel.push(Event::free(12, 1, 0, 1)).unwrap();
        let (consumer, _) = consumer_with(&channel, false, Some(observer));
        consumer.run();

        assert_eq!(
            *seen.lock(),
            vec![(EventKind::Free, 11), (EventKind::Free, 12)]
        );
    }

    #[test]
    fn spawned_consumer_stops_when_flag_clears() {
        let channel = Arc::new(EventChannel::new(8));
        let active = Arc::new(AtomicBool::new(true));
        let status = Arc::new(ConsumerStatus::new());
        let handle = EventConsumer::new(
            Arc::clone(&channel),
            Arc::clone(&active),
            Arc::clone(&status),
            None,
            Duration::from_micros(50),
        )
        .spawn("consumer-test")
        .unwrap();

        channel.push(Event::free(3, 4, 0, 1)).unwrap();
        active.store(false, Ordering::Release);
        let stats = handle.join().unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(status.state(), ConsumerState::Stopped);
    }

    #[test]
    fn panicking_observer_does_not_stop_the_drain() {
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn EventObserver> = Arc::new(move |event: &Event| {
            assert_ne!(event.identity, 22, "observer rejects identity 22");
            sink.lock().push(event.identity);
        });

        let channel = Arc::new(EventChannel::new(8));
        for identity in [21, 22, 23, 24] {
            channel.push(Event::free(identity, 8, 0, 1)).unwrap();
        }
        let (consumer, status) = consumer_with(&channel, false, Some(observer));
        let stats = consumer.run();

        assert_eq!(status.state(), ConsumerState::Stopped);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.frees, 4);
        assert_eq!(stats.observer_panics, 1);
        assert_eq!(*seen.lock(), vec![21, 23, 24]);
        assert!(channel.is_empty());
    }

    #[test]
    fn state_is_stopped_after_unwind() {
        let status = Arc::new(ConsumerStatus::new());
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = StopOnExit(Arc::clone(&status));
            panic!("drain aborted");
        }));
        assert!(result.is_err());
        assert_eq!(status.state(), ConsumerState::Stopped);
    }
}
