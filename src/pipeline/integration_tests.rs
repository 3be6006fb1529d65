//! End-to-end orchestrator runs against scripted collaborators.
//!
//! All tests run on tokio's paused clock, so retry delays, chunk timeouts
//! and inter-chunk pacing elapse instantly while keeping their ordering.

use super::retry::RetryPolicy;
use super::workflow::fakes::{workflow, FakeGeocoder, FakePublisher};
use super::workflow::GEOCODING_FAILED;
use super::*;
use crate::table::{MemoryTable, Row, RowUpdate, TableStore};
use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const PROGRESS: &str = "batch_progress.json";

struct Harness {
    geocoder: Arc<FakeGeocoder>,
    publisher: Arc<FakePublisher>,
    metrics: Arc<Metrics>,
    backend: Arc<InMemory>,
    chunk_size: usize,
}

impl Harness {
    fn new(geocoder: FakeGeocoder, publisher: FakePublisher, chunk_size: usize) -> Self {
        Self {
            geocoder: Arc::new(geocoder),
            publisher: Arc::new(publisher),
            metrics: Metrics::new(),
            backend: Arc::new(InMemory::new()),
            chunk_size,
        }
    }

    fn progress(&self) -> ProgressStore {
        ProgressStore::new(self.backend.clone(), ObjectPath::from(PROGRESS))
    }

    fn orchestrator(&self, table: Arc<dyn TableStore>, resume: Arc<dyn ResumeDecider>) -> BatchOrchestrator {
        let wf = workflow(
            self.geocoder.clone(),
            self.publisher.clone(),
            RetryPolicy::new(1, Duration::from_secs(3)),
            self.metrics.clone(),
        );
        let executor = ChunkExecutor::new(Arc::new(wf), 8, Duration::from_secs(600), self.metrics.clone());
        let config = OrchestratorConfig {
            chunk_size: self.chunk_size,
            inter_chunk_delay: Duration::from_secs(30),
            enable_metrics: false,
            metrics_interval_secs: 30,
        };
        BatchOrchestrator::new(table, executor, self.progress(), resume, self.metrics.clone(), config)
    }
}

/// Records the checkpoint visible at the moment of every batch write.
struct CheckpointProbeTable {
    inner: MemoryTable,
    progress: ProgressStore,
    seen: Mutex<Vec<Option<ProgressRecord>>>,
}

impl CheckpointProbeTable {
    fn new(inner: MemoryTable, progress: ProgressStore) -> Self {
        Self {
            inner,
            progress,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<Option<ProgressRecord>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableStore for CheckpointProbeTable {
    async fn fetch_unprocessed(&self) -> anyhow::Result<Vec<Row>> {
        self.inner.fetch_unprocessed().await
    }

    async fn batch_write(&self, updates: &[RowUpdate]) -> anyhow::Result<()> {
        let current = self.progress.load().await;
        self.seen.lock().unwrap().push(current);
        self.inner.batch_write(updates).await
    }
}

fn address_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::new(i, format!("{} Main St", i + 1), "Springfield", "IL", "62701"))
        .collect()
}

fn id_for(street_number: usize) -> String {
    format!("{}_main_st_springfield_62701", street_number)
}

#[tokio::test(start_paused = true)]
async fn test_three_row_scenario() {
    let rows = vec![
        Row::new(0, "400 Broad St", "Seattle", "WA", "98109"),
        Row::new(0, "Nowhere Rd", "Seattle", "WA", "98109"),
        Row::new(0, "85 Pike St", "Seattle", "WA", "98101"),
    ];
    let h = Harness::new(
        FakeGeocoder::unknown(&["Nowhere Rd"]),
        FakePublisher::timing_out("85_pike_st_seattle_98101", 1),
        250,
    );
    let table = Arc::new(MemoryTable::new(rows));

    let started = Instant::now();
    let report = h.orchestrator(table.clone(), Arc::new(AlwaysFresh)).run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.permanent_failures, 1);
    assert_eq!(report.transient_failures, 0);
    assert_eq!(report.retries, 1);

    let (url, status) = table.cell(0).unwrap();
    assert_eq!(url, "https://img.example/400_broad_st_seattle_98109.jpg");
    assert_eq!(status, "Success");

    assert_eq!(
        table.cell(1).unwrap(),
        (String::new(), format!("Error: {}", GEOCODING_FAILED))
    );
    let nowhere_calls = h
        .geocoder
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|a| a.starts_with("Nowhere Rd"))
        .count();
    assert_eq!(nowhere_calls, 1);

    let (url, status) = table.cell(2).unwrap();
    assert_eq!(url, "https://img.example/85_pike_st_seattle_98101.jpg");
    assert_eq!(status, "Success");
    assert_eq!(h.publisher.calls_for("85_pike_st_seattle_98101"), 2);

    // Exactly one retry delay, and no pacing after the only chunk
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(6));

    // One write for the chunk, checkpoint removed at the end
    assert_eq!(table.writes().len(), 1);
    assert!(h.progress().load().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_chunk_timeout_checkpoints_completed_rows() {
    // Chunk 1 holds rows 0..5, row 2 never finishes publishing; chunk 2 holds row 5
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::hanging(&[id_for(3).as_str()]), 5);
    let table = Arc::new(CheckpointProbeTable::new(MemoryTable::new(address_rows(6)), h.progress()));

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysFresh)).run().await.unwrap();

    let writes = table.inner.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].len(), 4);
    assert!(writes[0].iter().all(|u| u.row_index != 2));

    // Chunk 1 was checkpointed with its 4 outcomes before chunk 2 was written
    let seen = table.seen();
    assert_eq!(seen[0], None);
    let checkpoint = seen[1].clone().unwrap();
    assert_eq!(checkpoint.chunk_num, 1);
    assert_eq!(checkpoint.total_chunks, 2);
    assert_eq!(checkpoint.completed_records, 4);
    assert_eq!(checkpoint.failed_records, 0);

    assert_eq!(report.processed, 5);
    assert_eq!(report.abandoned, 1);
    assert_eq!(h.metrics.snapshot().rows_abandoned, 1);

    // The abandoned row is still unprocessed for the next run
    assert_eq!(table.inner.cell(2).unwrap(), (String::new(), String::new()));
}

#[tokio::test(start_paused = true)]
async fn test_resume_processes_remaining_chunks_only() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    h.progress().save(1, 3, 2, 0).await.unwrap();
    let table = Arc::new(CheckpointProbeTable::new(MemoryTable::new(address_rows(6)), h.progress()));

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysResume)).run().await.unwrap();

    assert!(report.resumed);
    assert_eq!(report.start_chunk, 2);
    assert_eq!(report.end_chunk, 3);
    assert_eq!(report.processed, 4);
    assert_eq!(h.geocoder.call_count(), 4);

    let mut written: Vec<usize> = table
        .inner
        .writes()
        .iter()
        .flat_map(|w| w.iter().map(|u| u.row_index))
        .collect();
    written.sort_unstable();
    assert_eq!(written, vec![2, 3, 4, 5]);

    // Counts carry over from the resumed checkpoint
    let last = table.seen().last().cloned().flatten().unwrap();
    assert_eq!(last.chunk_num, 2);
    assert_eq!(last.completed_records, 4);
}

#[tokio::test(start_paused = true)]
async fn test_stale_progress_starts_at_first_chunk() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    h.progress().save(3, 3, 6, 0).await.unwrap();
    let table = Arc::new(MemoryTable::new(address_rows(4)));

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysResume)).run().await.unwrap();

    assert!(!report.resumed);
    assert_eq!(report.start_chunk, 1);
    assert_eq!(report.total_chunks, 2);
    assert_eq!(report.processed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_declined_resume_starts_fresh() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    h.progress().save(1, 3, 2, 0).await.unwrap();
    let table = Arc::new(CheckpointProbeTable::new(MemoryTable::new(address_rows(6)), h.progress()));

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysFresh)).run().await.unwrap();

    assert_eq!(report.start_chunk, 1);
    assert_eq!(report.processed, 6);
    // The declined checkpoint is gone before the first write
    assert_eq!(table.seen()[0], None);
}

#[tokio::test(start_paused = true)]
async fn test_batch_write_failure_does_not_abort() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    let memory = MemoryTable::new(address_rows(4));
    memory.fail_next_writes(1);
    let table = Arc::new(memory);

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysFresh)).run().await.unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.unflushed, 2);
    assert_eq!(h.metrics.snapshot().batch_write_failures, 1);

    assert_eq!(table.cell(0).unwrap().0, "");
    assert_eq!(table.cell(1).unwrap().0, "");
    assert_eq!(table.cell(2).unwrap().1, "Success");
    assert_eq!(table.cell(3).unwrap().1, "Success");
}

#[tokio::test(start_paused = true)]
async fn test_chunks_are_paced() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    let table = Arc::new(MemoryTable::new(address_rows(5)));

    let started = Instant::now();
    let report = h.orchestrator(table, Arc::new(AlwaysFresh)).run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.total_chunks, 3);
    // Two pauses between three chunks, none after the last
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn test_no_work_clears_progress() {
    let h = Harness::new(FakeGeocoder::default(), FakePublisher::default(), 2);
    h.progress().save(1, 2, 2, 0).await.unwrap();
    let table = Arc::new(MemoryTable::new(address_rows(2)).with_value(0, "x").with_value(1, "y"));

    let report = h.orchestrator(table.clone(), Arc::new(AlwaysResume)).run().await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.total_chunks, 0);
    assert!(h.progress().load().await.is_none());
    assert!(table.writes().is_empty());
}
