//! Pipeline throughput benchmarks.
//!
//! Measures end-to-end runs of the assembled pipeline against a zero-latency
//! fixture backend, plus the batch splitter on its own.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use spamflow::collaborators::fixture::{FixtureMessage, FixtureUser};
use spamflow::collaborators::{FixtureBackend, FixtureSpec};
use spamflow::model::{Identifier, Record};
use spamflow::stages::{BatchAccumulator, BatchConfig, QuotaConfig};
use spamflow::{SpamPipeline, SpamPipelineConfig};

fn fixture(users: u64, per_user: u64) -> FixtureSpec {
    let mut spec = FixtureSpec {
        max_batch_size: 16,
        max_concurrent_checks: 16,
        ..FixtureSpec::default()
    };
    for u in 1..=users {
        let owned: Vec<u64> = (0..per_user).map(|i| u * 1000 + i).collect();
        spec.messages.extend(owned.iter().map(|&id| FixtureMessage {
            id,
            spam: id % 7 == 0,
            fail: false,
        }));
        spec.users.push(FixtureUser {
            id: u,
            email: format!("user{u}@x"),
            aliases: Vec::new(),
            messages: owned,
            fail_lookup: false,
            attributes: Default::default(),
        });
    }
    spec
}

fn bench_pipeline_run(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("pipeline_run");

    for (name, users, capacity) in [("small", 16, 1), ("medium", 128, 1), ("medium_buffered", 128, 32)] {
        let per_user = 4;
        let backend = Arc::new(FixtureBackend::new(fixture(users, per_user)).unwrap());
        let config = SpamPipelineConfig {
            channel_capacity: capacity,
            batch: BatchConfig { max_batch_size: 16 },
            quota: QuotaConfig { max_in_flight: 16 },
        };
        let pipeline = SpamPipeline::with_backend(config, backend);
        // Every user twice, so dedup has work to do.
        let identifiers: Vec<Identifier> = (1..=users)
            .chain(1..=users)
            .map(|u| Identifier::new(format!("user{u}@x")))
            .collect();

        group.throughput(Throughput::Elements(users * per_user));
        group.bench_function(BenchmarkId::new("run", name), |b| {
            b.to_async(&rt).iter(|| async {
                let run = pipeline.run(identifiers.clone()).await.unwrap();
                black_box(run.items.len())
            })
        });
    }

    group.finish();
}

fn bench_batch_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_split");

    for size in [2usize, 16, 64] {
        let accumulator = BatchAccumulator::new(BatchConfig {
            max_batch_size: size,
        });
        let records: Vec<Record> = (0..1024u64)
            .map(|i| Record::new(i, format!("user{i}@x")))
            .collect();

        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_function(BenchmarkId::new("split_1024", size), |b| {
            b.iter(|| black_box(accumulator.split(records.clone()).len()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline_run, bench_batch_split);
criterion_main!(benches);
