//! Allocation and garbage-collection telemetry pipeline for managed runtimes.
//!
//! The pipeline sits inside the runtime's allocation path. Producer threads
//! report allocations, frees and GC phases; the pipeline records what the
//! sampling policy admits and hands events to a single background consumer.
//!
//! # Architecture
//!
//! - **Sampling policy** (`sampling`): lock-free 1-in-N admission gate
//! - **Event channel** (`channel`): bounded multi-producer ring buffer, never blocks
//! - **Allocation ledger** (`ledger`): sharded map of live allocation records
//! - **Aggregate counters** (`counters`): relaxed atomic byte/count totals
//! - **Event consumer** (`consumer`): background drain thread with orderly shutdown
//! - **Control surface** (`control`): statistics and command-string protocol
//! - **Runtime bridge** (`runtime`): capability interface to the instrumented runtime
//! - **Configuration** (`config`): startup option parsing
//! - **C ABI** (`ffi`): exported entry points over an installed pipeline

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod consumer;
pub mod control;
pub mod counters;
pub mod error;
pub mod event;
pub mod ffi;
pub mod ledger;
pub mod pipeline;
pub mod runtime;
pub mod sampling;
pub mod summary;

pub use channel::EventChannel;
pub use config::PipelineConfig;
pub use consumer::{ConsumerState, ConsumerStats};
pub use control::{Command, ControlSurface};
pub use counters::{AggregateCounters, StatsSnapshot};
pub use error::PipelineError;
pub use event::{CallStack, Event, EventKind, StackFrame};
pub use ledger::{AllocationLedger, AllocationRecord};
pub use pipeline::Pipeline;
pub use runtime::{DetachedRuntime, EventObserver, OwnedHandle, RuntimeBridge, ThreadRef, TypeRef};
pub use sampling::SamplingPolicy;
pub use summary::{LeakCandidate, LedgerSummary, TypeGrowth, TypeSummary};
