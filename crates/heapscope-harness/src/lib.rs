//! Load harness for the heapscope pipeline.
//!
//! This crate provides:
//! - A synthetic runtime: a [`RuntimeBridge`](heapscope_core::RuntimeBridge)
//!   that counts handle promotions and releases and fabricates call stacks
//! - Seeded workloads: N producer threads driving allocs, frees and GC cycles
//! - Reports: JSON and markdown summaries of a simulation run

#![forbid(unsafe_code)]

pub mod report;
pub mod runtime;
pub mod workload;

pub use report::SimulationReport;
pub use runtime::SyntheticRuntime;
pub use workload::{HarnessError, WorkloadSpec, run_simulation};
