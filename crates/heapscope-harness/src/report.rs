//! Report generation for simulation runs.

use heapscope_core::{ConsumerStats, LedgerSummary, PipelineConfig, StatsSnapshot};
use serde::Serialize;

use crate::workload::{ProducerTotals, WorkloadSpec};

/// Everything observed during one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Pipeline configuration the run used.
    pub config: PipelineConfig,
    pub workload: WorkloadSpec,
    /// Summed over all producer threads.
    pub producers: ProducerTotals,
    /// Aggregate counters when the producers finished.
    pub stats: StatsSnapshot,
    pub accuracy_percent: f64,
    /// Consumer totals after the final drain.
    pub consumer: ConsumerStats,
    pub dropped_events: u64,
    pub handles_promoted: u64,
    pub handles_released: u64,
    pub stacks_captured: u64,
    pub produce_elapsed_us: u64,
    pub total_elapsed_us: u64,
    /// Live ledger roll-up when the producers finished.
    pub summary: LedgerSummary,
}

impl SimulationReport {
    /// Recorded allocations per second of producer time.
    #[must_use]
    pub fn alloc_throughput(&self) -> f64 {
        if self.produce_elapsed_us == 0 {
            return 0.0;
        }
        self.producers.attempted as f64 / (self.produce_elapsed_us as f64 / 1_000_000.0)
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# heapscope simulation\n\n");
        out.push_str(&format!(
            "- Threads: {} x {} allocations (seed {:#x})\n",
            self.workload.threads, self.workload.allocs_per_thread, self.workload.seed
        ));
        out.push_str(&format!(
            "- Sampling: {} (1 in {})\n",
            if self.config.sampling_enabled { "on" } else { "off" },
            self.config.sampling_interval
        ));
        out.push_str(&format!(
            "- Recorded: {} of {} attempted, {} freed\n",
            self.producers.recorded, self.producers.attempted, self.producers.freed
        ));
        out.push_str(&format!(
            "- Events: {} processed, {} dropped\n",
            self.consumer.processed, self.dropped_events
        ));
        out.push_str(&format!(
            "- GC: {} cycles, {} ms\n",
            self.consumer.gc_finishes, self.consumer.gc_time_ms
        ));
        out.push_str(&format!(
            "- Handles: {} promoted, {} released\n",
            self.handles_promoted, self.handles_released
        ));
        out.push_str(&format!(
            "- Throughput: {:.0} allocs/s\n\n",
            self.alloc_throughput()
        ));

        out.push_str("| Type | Instances | Bytes | Avg |\n");
        out.push_str("|------|-----------|-------|-----|\n");
        for t in &self.summary.top_types {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                t.type_ref.0, t.instances, t.total_bytes, t.avg_bytes
            ));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::run_simulation;

    fn report() -> SimulationReport {
        run_simulation(
            PipelineConfig {
                sampling_enabled: false,
                channel_capacity: 4096,
                ..PipelineConfig::default()
            },
            &WorkloadSpec {
                threads: 2,
                allocs_per_thread: 500,
                type_count: 4,
                ..WorkloadSpec::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn json_has_stable_shape() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json()).unwrap();
        assert_eq!(json["producers"]["attempted"], 1000);
        assert_eq!(json["stats"]["alloc_count"], 1000);
        assert_eq!(json["config"]["sampling_enabled"], false);
        assert!(json["summary"]["top_types"].is_array());
        assert!(json["consumer"]["processed"].is_u64());
    }

    #[test]
    fn markdown_lists_types() {
        let md = report().to_markdown();
        assert!(md.starts_with("# heapscope simulation"));
        assert!(md.contains("| Type | Instances | Bytes | Avg |"));
        assert!(md.contains("1000 attempted"));
    }
}
