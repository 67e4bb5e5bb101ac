//! Performance benchmarks for the relay.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sample_relay::{
    wire, ChangeDetector, EventPublisher, MemoryBus, Publisher, Record, RecordStore, RetryPolicy,
    Snapshot, StoreConfig, Timestamp, Topics, UnchangedPolicy, VersionStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn sample(i: usize) -> Record {
    let mut record = Record::new(format!("P-{:07}-T01-IM6", i))
        .with_attribute("oncotree_code", "LUAD")
        .with_attribute("somatic_status", "Matched")
        .with_measurement("tumor_purity", 0.4, "fraction")
        .with_measurement("tmb", 7.9, "mut/Mb");
    record.meta_data.dmp_patient_id = format!("P-{:07}", i);
    record.meta_data.cancer_type = "Non-Small Cell Lung Cancer".into();
    record.meta_data.gene_panel = "IMPACT505".into();
    record
}

fn create_store(dir: &TempDir) -> VersionStore {
    VersionStore::create(StoreConfig {
        path: dir.path().join("store"),
        create_if_missing: true,
    })
    .unwrap()
}

/// Benchmark wire encode and decode of one record
fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");
    let record = sample(1);
    let bytes = wire::encode(&record).unwrap();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(wire::encode(black_box(&record)).unwrap()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(wire::decode(black_box(&bytes)).unwrap()));
    });

    group.finish();
}

/// Benchmark change detection against stores with deep version histories
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for depth in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("history_depth", depth), &depth, |b, &depth| {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir);
            for v in 0..depth {
                let mut version = sample(1).with_attribute("revision", v.to_string());
                version.last_modified = Some(Timestamp(v as i64 + 1));
                store.insert(version).unwrap();
            }
            let candidate = sample(1);

            b.iter(|| {
                let detector = ChangeDetector::new(&store);
                black_box(detector.classify(&candidate).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark snapshot upserts at various sizes
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_upsert");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("entries", size), &size, |b, &size| {
            let records: Vec<_> = (0..size).map(sample).collect();
            let mut snapshot = Snapshot::from_records(records.clone());
            // Cycling through identities always replaces the oldest entry,
            // which shifts every other position.
            let mut next = 0;

            b.iter(|| {
                let record = records[next % size].clone();
                next += 1;
                black_box(snapshot.upsert(record))
            });
        });
    }

    group.finish();
}

/// Benchmark a full publish run into a fresh store
fn bench_publish_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_run");
    group.sample_size(10);

    for count in [100, 1_000] {
        let batch: Vec<_> = (0..count).map(sample).collect();
        group.bench_with_input(BenchmarkId::new("records", count), &batch, |b, batch| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let store: Arc<dyn RecordStore> = Arc::new(create_store(&dir));
                let bus = MemoryBus::new();
                let events = EventPublisher::new(bus, Topics::default(), RetryPolicy::no_retry());
                let mut publisher = Publisher::new(store, events, UnchangedPolicy::Reannounce);
                black_box(publisher.run(batch))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_wire, bench_classify, bench_snapshot, bench_publish_run);
criterion_main!(benches);
