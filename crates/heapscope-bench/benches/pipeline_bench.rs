//! Hot-path overhead benchmarks.
//!
//! Measures the per-call cost a runtime pays for each notification, with
//! and without sampling, plus the ledger and sampling gate in isolation.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use heapscope_core::{
    AllocationLedger, AllocationRecord, DetachedRuntime, Pipeline, PipelineConfig,
    SamplingPolicy, ThreadRef, TypeRef,
};

fn bench_sampling_gate(c: &mut Criterion) {
    let policy = SamplingPolicy::new(true, 10);
    c.bench_function("sampling_should_record", |b| {
        b.iter(|| {
            criterion::black_box(policy.should_record());
        });
    });
}

fn bench_ledger_insert_remove(c: &mut Criterion) {
    let ledger = AllocationLedger::new(64, 4096);
    let mut identity = 0_u64;
    c.bench_function("ledger_insert_remove", |b| {
        b.iter(|| {
            identity = identity.wrapping_add(16);
            ledger.insert(AllocationRecord {
                identity,
                size: 64,
                timestamp_ms: 0,
                type_ref: TypeRef(1),
                thread_ref: ThreadRef(1),
                call_stack: Vec::new(),
                thread_id: 1,
            });
            criterion::black_box(ledger.remove(identity));
        });
    });
}

fn bench_notify(c: &mut Criterion, name: &str, options: &str) {
    let pipeline = Pipeline::start(PipelineConfig::from_options(options), Arc::new(DetachedRuntime))
        .expect("pipeline starts");
    let mut identity = 0_u64;
    c.bench_function(name, |b| {
        b.iter(|| {
            identity = identity.wrapping_add(16);
            criterion::black_box(pipeline.notify_alloc(identity, 64, TypeRef(1), ThreadRef(1)));
            pipeline.notify_free(identity);
        });
    });
    pipeline.shutdown();
}

fn bench_notify_alloc_free(c: &mut Criterion) {
    bench_notify(c, "notify_alloc_free_unsampled", "nosampling");
    bench_notify(c, "notify_alloc_free_sampled_1_in_10", "sampling=10");
}

criterion_group!(
    benches,
    bench_sampling_gate,
    bench_ledger_insert_remove,
    bench_notify_alloc_free
);
criterion_main!(benches);
