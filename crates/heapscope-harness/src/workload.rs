//! Seeded multi-threaded workloads.
//!
//! Each producer thread allocates identities from its own disjoint range,
//! frees a random live one with probability `free_ratio` after every
//! allocation, and producer 0 brackets a GC cycle every `gc_every`
//! allocations. The same seed reproduces the same per-thread sequence.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use heapscope_core::{Pipeline, PipelineConfig, PipelineError, RuntimeBridge, ThreadRef, TypeRef};
use thiserror::Error;

use crate::report::SimulationReport;
use crate::runtime::SyntheticRuntime;

/// Types listed in a simulation report.
const REPORT_TOP_TYPES: usize = 10;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid workload: {0}")]
    InvalidWorkload(&'static str),
    #[error("producer thread {0} panicked")]
    ProducerPanicked(usize),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WorkloadSpec {
    pub threads: usize,
    pub allocs_per_thread: u64,
    /// Probability of freeing a live object after each allocation.
    pub free_ratio: f64,
    /// GC cycle period in producer-0 allocations; 0 disables GC events.
    pub gc_every: u64,
    /// Distinct synthetic types.
    pub type_count: u64,
    pub seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            threads: 4,
            allocs_per_thread: 100_000,
            free_ratio: 0.5,
            gc_every: 10_000,
            type_count: 32,
            seed: 0xDEAD_BEEF,
        }
    }
}

impl WorkloadSpec {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidWorkload("threads must be at least 1"));
        }
        if self.type_count == 0 {
            return Err(HarnessError::InvalidWorkload("type_count must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.free_ratio) {
            return Err(HarnessError::InvalidWorkload("free_ratio must be within [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of the generator.
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: u64, high_inclusive: u64) -> u64 {
        let span = high_inclusive - low + 1;
        low + self.next_u64() % span
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        (self.next_u64() >> 11) as f64 / ((1_u64 << 53) as f64) < p
    }
}

/// What one producer thread did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProducerTotals {
    pub attempted: u64,
    pub recorded: u64,
    pub freed: u64,
    pub gc_cycles: u64,
}

impl std::ops::AddAssign for ProducerTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.attempted += rhs.attempted;
        self.recorded += rhs.recorded;
        self.freed += rhs.freed;
        self.gc_cycles += rhs.gc_cycles;
    }
}

fn produce(pipeline: &Pipeline, spec: &WorkloadSpec, producer: usize) -> ProducerTotals {
    let mut rng = XorShift64::new(spec.seed ^ (producer as u64 + 1).wrapping_mul(0x9E37_79B9));
    let base = (producer as u64 + 1) << 40;
    let thread_ref = ThreadRef(producer as u64 + 1);
    let mut live: Vec<u64> = Vec::new();
    let mut totals = ProducerTotals::default();

    for i in 0..spec.allocs_per_thread {
        let identity = base + (i + 1) * 16;
        let size = rng.gen_range(2, 512) * 8;
        let type_ref = TypeRef(rng.gen_range(1, spec.type_count));

        totals.attempted += 1;
        if pipeline.notify_alloc(identity, size, type_ref, thread_ref) {
            totals.recorded += 1;
            live.push(identity);
        }

        if !live.is_empty() && rng.chance(spec.free_ratio) {
            let victim = live.swap_remove(rng.next_u64() as usize % live.len());
            if pipeline.notify_free(victim) {
                totals.freed += 1;
            }
        }

        if producer == 0 && spec.gc_every > 0 && (i + 1) % spec.gc_every == 0 {
            pipeline.notify_gc_start();
            pipeline.notify_gc_finish();
            totals.gc_cycles += 1;
        }
    }
    totals
}

/// Start a pipeline over a fresh [`SyntheticRuntime`], drive it with `spec`
/// and shut it down.
pub fn run_simulation(
    config: PipelineConfig,
    spec: &WorkloadSpec,
) -> Result<SimulationReport, HarnessError> {
    spec.validate()?;
    let runtime = Arc::new(SyntheticRuntime::new());
    let bridge: Arc<dyn RuntimeBridge> = runtime.clone();
    let pipeline = Pipeline::start(config, bridge)?;
    tracing::info!(
        threads = spec.threads,
        allocs_per_thread = spec.allocs_per_thread,
        seed = spec.seed,
        "simulation starting"
    );

    let started = Instant::now();
    let totals = thread::scope(|scope| -> Result<ProducerTotals, HarnessError> {
        let workers: Vec<_> = (0..spec.threads)
            .map(|producer| {
                let pipeline = &pipeline;
                scope.spawn(move || produce(pipeline, spec, producer))
            })
            .collect();

        let mut totals = ProducerTotals::default();
        for (producer, worker) in workers.into_iter().enumerate() {
            totals += worker
                .join()
                .map_err(|_| HarnessError::ProducerPanicked(producer))?;
        }
        Ok(totals)
    })?;
    let produce_elapsed = started.elapsed();

    let config = pipeline.config().clone();
    let control = pipeline.control();
    let stats = control.stats();
    let summary = control.ledger_summary(REPORT_TOP_TYPES);
    let consumer = pipeline.shutdown();
    let elapsed = started.elapsed();
    drop(pipeline);

    let report = SimulationReport {
        config,
        workload: spec.clone(),
        producers: totals,
        stats,
        accuracy_percent: stats.accuracy_percent(),
        consumer,
        dropped_events: control.dropped_events(),
        handles_promoted: runtime.promoted(),
        handles_released: runtime.released(),
        stacks_captured: runtime.captures(),
        produce_elapsed_us: u64::try_from(produce_elapsed.as_micros()).unwrap_or(u64::MAX),
        total_elapsed_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        summary,
    };
    tracing::info!(
        recorded = report.producers.recorded,
        dropped = report.dropped_events,
        outstanding_handles = runtime.outstanding(),
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> WorkloadSpec {
        WorkloadSpec {
            threads: 3,
            allocs_per_thread: 2_000,
            free_ratio: 0.5,
            gc_every: 500,
            type_count: 8,
            seed: 42,
        }
    }

    fn record_everything() -> PipelineConfig {
        PipelineConfig {
            sampling_enabled: false,
            channel_capacity: 16_384,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn every_handle_is_released() {
        let report = run_simulation(record_everything(), &small_spec()).unwrap();
        assert_eq!(report.producers.attempted, 6_000);
        assert_eq!(report.producers.recorded, 6_000);
        assert_eq!(report.producers.gc_cycles, 4);
        assert_eq!(report.handles_promoted, report.handles_released);
        assert_eq!(report.handles_promoted, 2 * 6_000);
        assert_eq!(report.stats.alloc_count, 6_000);
        assert_eq!(report.stats.free_count, report.producers.freed);
        assert!((report.accuracy_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn events_are_processed_or_dropped() {
        let report = run_simulation(
            PipelineConfig {
                channel_capacity: 16,
                ..record_everything()
            },
            &small_spec(),
        )
        .unwrap();
        let produced = report.producers.recorded
            + report.producers.freed
            + 2 * report.producers.gc_cycles;
        assert_eq!(report.consumer.processed + report.dropped_events, produced);
        assert_eq!(report.handles_promoted, report.handles_released);
    }

    #[test]
    fn sampling_reduces_recorded_allocations() {
        let report = run_simulation(
            PipelineConfig {
                sampling_enabled: true,
                sampling_interval: 10,
                ..record_everything()
            },
            &small_spec(),
        )
        .unwrap();
        assert_eq!(report.producers.recorded, 600);
    }

    #[test]
    fn same_seed_same_single_thread_run() {
        let spec = WorkloadSpec {
            threads: 1,
            ..small_spec()
        };
        let a = run_simulation(record_everything(), &spec).unwrap();
        let b = run_simulation(record_everything(), &spec).unwrap();
        assert_eq!(a.producers, b.producers);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn rejects_bad_workloads() {
        let err = run_simulation(
            record_everything(),
            &WorkloadSpec {
                threads: 0,
                ..small_spec()
            },
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidWorkload(_)));

        let err = run_simulation(
            PipelineConfig {
                ledger_shards: 0,
                ..record_everything()
            },
            &small_spec(),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Pipeline(_)));
    }

    #[test]
    fn chance_extremes() {
        let mut rng = XorShift64::new(0);
        assert!((0..1000).all(|_| !rng.chance(0.0)));
        assert!((0..1000).all(|_| rng.chance(1.0)));
    }
}
