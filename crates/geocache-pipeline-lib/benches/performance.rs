//! Performance benchmarks for geocache-pipeline-lib
//!
//! Run with: cargo bench --package geocache-pipeline-lib

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use geocache_pipeline_lib::progress::NullSink;
use geocache_pipeline_lib::stages::{Deduplicate, MergeFiles};
use geocache_pipeline_lib::{
    CancelToken, Document, ExecutionPlan, Geocache, RunOptions, StageContext, TransformerRegistry,
    Waypoint,
};
use time::OffsetDateTime;

/// Generate documents where every other document repeats the codes of the previous one
fn generate_documents(num_documents: usize, waypoints_per_document: usize) -> Vec<Document> {
    (0..num_documents)
        .map(|d| {
            let first_code = (d / 2) * waypoints_per_document;
            let created = OffsetDateTime::UNIX_EPOCH + time::Duration::days(d as i64);
            let waypoints = (0..waypoints_per_document)
                .map(|w| {
                    let code = first_code + w;
                    let t = w as f64 / waypoints_per_document as f64;
                    let waypoint = Waypoint::new(format!("GC{code:X}"), 51.5 + t * 0.1, -0.1 + t * 0.1);
                    if w % 4 == 0 {
                        waypoint
                    } else {
                        waypoint.with_geocache(Geocache::new(format!("Cache {code}"), "Traditional Cache"))
                    }
                })
                .collect();
            Document::new(format!("pocket-query-{d}.gpx"))
                .with_created(created)
                .with_waypoints(waypoints)
        })
        .collect()
}

// ============================================================================
// Core Benchmarks
// ============================================================================

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");
    group.sample_size(20);

    let documents = generate_documents(20, 5_000);
    let total = 20 * 5_000;
    let options = RunOptions::default();
    let cancel = CancelToken::new();

    group.throughput(Throughput::Elements(total as u64));
    group.bench_function("20x5k_half_duplicated", |b| {
        b.iter_batched(
            || documents.clone(),
            |mut docs| {
                let ctx = StageContext::new("Remove duplicates", &options, &NullSink, &cancel);
                Deduplicate::deduplicate(&mut docs, &ctx).ok()
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(20);

    let documents = generate_documents(50, 2_000);
    let total = 50 * 2_000;

    group.throughput(Throughput::Elements(total as u64));
    group.bench_function("50x2k", |b| {
        b.iter_batched(
            || documents.clone(),
            |mut docs| {
                MergeFiles::merge(&mut docs);
                docs
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let documents = generate_documents(20, 2_000);
    let options = RunOptions::default();
    let cancel = CancelToken::new();
    let registry = TransformerRegistry::new()
        .with(|| Box::new(Deduplicate::new()))
        .with(|| Box::new(MergeFiles::new()));

    group.bench_function("dedup_then_merge_20x2k", |b| {
        b.iter_batched(
            || documents.clone(),
            |mut docs| {
                let mut plan = ExecutionPlan::resolve(registry.instantiate(), &options);
                plan.execute(&mut docs, &options, &NullSink, &cancel).ok();
                docs
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_deduplicate, bench_merge, bench_pipeline);

criterion_main!(benches);
