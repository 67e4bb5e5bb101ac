//! Scaling tests with synthetic batches of 10k+ samples.
//!
//! Measures the publish path end to end and the pieces it leans on:
//! - Store population and index rebuild on reopen
//! - Re-running an unchanged batch
//! - Snapshot reconciliation with many revisions per identity

use sample_relay::{
    EventPublisher, MemoryBus, Publisher, Record, RecordStore, RetryPolicy, Snapshot, StoreConfig,
    Topics, UnchangedPolicy, VersionStore,
};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

const SAMPLE_COUNT: usize = 10_000;

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().to_path_buf(),
        create_if_missing: true,
    }
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn report(&self) {
        println!("  {} took {:.2}ms", self.name, self.elapsed_ms());
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.elapsed_ms();
        println!(
            "  {} took {:.2}ms ({} items, {:.0} items/sec)",
            self.name,
            ms,
            count,
            if ms > 0.0 { count as f64 / (ms / 1000.0) } else { 0.0 }
        );
    }
}

fn synthetic_batch(count: usize, revision: usize) -> Vec<Record> {
    let panels = ["IMPACT341", "IMPACT410", "IMPACT468", "IMPACT505"];
    (0..count)
        .map(|i| {
            let mut record = Record::new(format!("P-{:07}-T01-IM{}", i, i % 7))
                .with_attribute("revision", revision.to_string())
                .with_measurement("tumor_purity", (i % 100) as f64 / 100.0, "fraction");
            record.meta_data.dmp_patient_id = format!("P-{:07}", i);
            record.meta_data.gene_panel = panels[i % panels.len()].to_string();
            record
        })
        .collect()
}

fn publisher(store: Arc<dyn RecordStore>, bus: &Arc<MemoryBus>) -> Publisher {
    let events = EventPublisher::new(bus.clone(), Topics::default(), RetryPolicy::no_retry());
    Publisher::new(store, events, UnchangedPolicy::Reannounce)
}

#[test]
fn test_scaling_publish_and_rerun() {
    println!("\n=== {} samples, three runs ===", SAMPLE_COUNT);

    let dir = TempDir::new().unwrap();
    let bus = MemoryBus::new();

    let store = Arc::new(VersionStore::create(test_config(&dir)).unwrap());
    let first = synthetic_batch(SAMPLE_COUNT, 1);

    let timer = Timer::new("First run (all new)");
    let summary = publisher(store.clone(), &bus).run(&first);
    timer.report_with_count(SAMPLE_COUNT);
    assert_eq!(summary.new, SAMPLE_COUNT);
    assert_eq!(store.len(), SAMPLE_COUNT);

    drop(store);

    let timer = Timer::new("Reopen store (rebuild index)");
    let store = Arc::new(VersionStore::open(test_config(&dir)).unwrap());
    timer.report();
    assert_eq!(store.identity_count(), SAMPLE_COUNT);

    let timer = Timer::new("Second run (all unchanged)");
    let summary = publisher(store.clone(), &bus).run(&first);
    timer.report_with_count(SAMPLE_COUNT);
    assert_eq!(summary.unchanged, SAMPLE_COUNT);
    assert_eq!(store.len(), SAMPLE_COUNT);

    let timer = Timer::new("Third run (all changed)");
    let summary = publisher(store.clone(), &bus).run(&synthetic_batch(SAMPLE_COUNT, 2));
    timer.report_with_count(SAMPLE_COUNT);
    assert_eq!(summary.changed, SAMPLE_COUNT);
    assert_eq!(store.len(), SAMPLE_COUNT * 2);

    let sample = store.latest("P-0000042-T01-IM0").unwrap().unwrap();
    assert_eq!(sample.record.meta_data.attributes["revision"], "2");
    assert_eq!(store.versions("P-0000042-T01-IM0").unwrap().len(), 2);
}

#[test]
fn test_scaling_snapshot_revisions() {
    println!("\n=== Snapshot, 1k identities x 20 revisions ===");

    let identities = 1_000;
    let revisions = 20;
    let mut snapshot = Snapshot::new();

    let timer = Timer::new("Upsert revisions");
    for revision in 0..revisions {
        for record in synthetic_batch(identities, revision) {
            snapshot.upsert(record);
        }
    }
    timer.report_with_count(identities * revisions);

    assert_eq!(snapshot.len(), identities);
    for (i, record) in snapshot.records().iter().enumerate() {
        assert_eq!(snapshot.position(record.identity()), Some(i));
        assert_eq!(
            record.meta_data.attributes["revision"],
            (revisions - 1).to_string()
        );
    }
}
