//! Metron Engine Benchmarks
//!
//! Throughput of batch ingestion and hourly aggregation against the
//! in-memory store.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use metron_common::{MetricKind, MetronConfig};
use metron_timeseries::{
    AggregateFunction, AggregateQuery, BucketWidth, CancellationToken, MetricsEngine, PointInput,
};

const BATCH: usize = 1000;

fn batch(name: &str) -> Vec<PointInput> {
    let now = Utc::now();
    (0..BATCH)
        .map(|i| {
            PointInput::new(name, MetricKind::Value, format!("{}.5", i))
                .at(now - Duration::seconds(i as i64))
        })
        .collect()
}

fn ingest_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime should start");
    let engine = MetricsEngine::open(MetronConfig::development()).expect("engine should open");

    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.bench_function("batch_1000", |b| {
        b.iter(|| {
            let receipt = runtime
                .block_on(engine.ingest_batch(batch("bench.ingest"), &CancellationToken::new()))
                .expect("batch should succeed");
            black_box(receipt.accepted)
        })
    });
    group.finish();
}

fn aggregate_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime should start");
    let engine = MetricsEngine::open(MetronConfig::development()).expect("engine should open");
    for _ in 0..50 {
        runtime
            .block_on(engine.ingest_batch(batch("bench.query"), &CancellationToken::new()))
            .expect("seed batch should succeed");
    }

    let now = Utc::now();
    let query = AggregateQuery::new(
        ["bench.query"],
        AggregateFunction::Avg,
        BucketWidth::Minute,
        now - Duration::hours(1),
        now + Duration::minutes(1),
    );

    let mut group = c.benchmark_group("aggregate");
    group.throughput(Throughput::Elements((50 * BATCH) as u64));
    group.bench_function("avg_by_minute_50k", |b| {
        b.iter(|| {
            let result = runtime
                .block_on(engine.aggregate(&query, &CancellationToken::new()))
                .expect("aggregate should succeed");
            black_box(result.points_scanned)
        })
    });
    group.finish();
}

criterion_group!(benches, ingest_benchmark, aggregate_benchmark);
criterion_main!(benches);
