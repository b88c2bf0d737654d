//! Read-only statistics and the command-string protocol used by an external
//! controller.
//!
//! Recognised commands: `sampling:<N>`, `snapshot`, `stop`. A `snapshot`
//! also logs the types that grew since the previous one. Anything else,
//! including a non-positive or non-numeric interval, is ignored. Every
//! command is idempotent.

use std::sync::Arc;

use crate::config::parse_positive;
use crate::consumer::{ConsumerState, ConsumerStats};
use crate::counters::StatsSnapshot;
use crate::pipeline::Shared;
use crate::summary::{LeakCandidate, LedgerSummary, TypeGrowth};

/// Types listed when a `snapshot` command is logged.
const SNAPSHOT_LOG_TOP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Record one allocation in every `N`.
    SetSampling(u32),
    /// Log a summary of the live ledger.
    Snapshot,
    /// Stop admitting events and let the consumer drain.
    Stop,
}

impl Command {
    /// Parse a command string; `None` for anything unrecognised or malformed.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(arg) = text.strip_prefix("sampling:") {
            let interval = parse_positive(arg.trim())?;
            return Some(Self::SetSampling(u32::try_from(interval).unwrap_or(u32::MAX)));
        }
        match text {
            "snapshot" => Some(Self::Snapshot),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Cheap, cloneable handle onto a running pipeline.
#[derive(Clone)]
pub struct ControlSurface {
    shared: Arc<Shared>,
}

impl ControlSurface {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.ledger.counters().snapshot()
    }

    /// `[total_allocated, total_freed, current_usage, alloc_count, free_count]`.
    #[must_use]
    pub fn stats_array(&self) -> [u64; 5] {
        self.stats().to_array()
    }

    /// Parse and apply a command. Returns what was applied, if anything.
    pub fn send_command(&self, text: &str) -> Option<Command> {
        let Some(command) = Command::parse(text) else {
            tracing::debug!(command = text, "ignoring unrecognised command");
            return None;
        };

        match command {
            Command::SetSampling(interval) => {
                self.shared.sampling.set_interval(interval);
                tracing::info!(interval, "sampling interval updated");
            }
            Command::Snapshot => {
                let full = self.ledger_summary(usize::MAX);
                let previous = self.shared.last_snapshot.lock().replace(full.clone());
                let mut summary = full.clone();
                summary.top_types.truncate(SNAPSHOT_LOG_TOP);
                tracing::info!(
                    live_records = summary.live_records,
                    live_bytes = summary.live_bytes,
                    distinct_types = summary.distinct_types,
                    "snapshot requested"
                );
                for entry in &summary.top_types {
                    tracing::info!(
                        type_ref = entry.type_ref.0,
                        instances = entry.instances,
                        total_bytes = entry.total_bytes,
                        avg_bytes = entry.avg_bytes,
                        "live type"
                    );
                }
                if let Some(previous) = previous {
                    for growth in full.diff(&previous).iter().take(SNAPSHOT_LOG_TOP) {
                        tracing::info!(
                            type_ref = growth.type_ref.0,
                            instance_delta = growth.instance_delta,
                            byte_delta = growth.byte_delta,
                            "type grew since last snapshot"
                        );
                    }
                }
            }
            Command::Stop => self.shared.request_stop("stop command"),
        }
        Some(command)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Approximate number of events waiting for the consumer.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.channel.len()
    }

    /// `n > 0` samples one in `n` allocations; `n <= 0` records everything.
    pub fn set_sampling_interval(&self, n: i64) {
        let sampling = &self.shared.sampling;
        if n > 0 {
            sampling.set_interval(u32::try_from(n).unwrap_or(u32::MAX));
            sampling.set_enabled(true);
            tracing::info!(interval = n, "sampling enabled");
        } else {
            sampling.set_enabled(false);
            tracing::info!("sampling disabled, recording every allocation");
        }
    }

    #[must_use]
    pub fn sampling(&self) -> (bool, u32) {
        let sampling = &self.shared.sampling;
        (sampling.is_enabled(), sampling.interval())
    }

    /// Events lost because the channel was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped()
    }

    #[must_use]
    pub fn consumer_state(&self) -> ConsumerState {
        self.shared.consumer_status.state()
    }

    #[must_use]
    pub fn consumer_stats(&self) -> ConsumerStats {
        self.shared.consumer_status.stats()
    }

    /// Per-type roll-up of the live ledger. Walks every shard.
    #[must_use]
    pub fn ledger_summary(&self, top_n: usize) -> LedgerSummary {
        let snapshot = self.shared.ledger.snapshot();
        LedgerSummary::from_records(snapshot.iter().map(|(_, record)| record), top_n)
    }

    /// Types with live records at least `age_threshold_ms` old, heaviest
    /// first. Walks every shard.
    #[must_use]
    pub fn leak_candidates(&self, age_threshold_ms: u64, top_n: usize) -> Vec<LeakCandidate> {
        let now_ms = self.shared.clock.now_ms();
        let snapshot = self.shared.ledger.snapshot();
        LeakCandidate::from_records(
            snapshot.iter().map(|(_, record)| record),
            now_ms,
            age_threshold_ms,
            top_n,
        )
    }

    /// Types that grew since the previous `snapshot` command, largest byte
    /// growth first. Empty until a snapshot has been taken.
    #[must_use]
    pub fn growth_since_snapshot(&self) -> Vec<TypeGrowth> {
        let previous = self.shared.last_snapshot.lock().clone();
        previous.map_or_else(Vec::new, |previous| {
            self.ledger_summary(usize::MAX).diff(&previous)
        })
    }
}

impl std::fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSurface")
            .field("active", &self.is_active())
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}
