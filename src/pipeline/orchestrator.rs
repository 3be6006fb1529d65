//! Sequential chunk loop with pacing, write-back and checkpointing.
//!
//! A run moves through fetch, resume decision, the chunk loop and
//! finalization. For every chunk the table write happens before the
//! checkpoint, and the checkpoint before the next chunk starts, so a resumed
//! run never skips rows whose results were not written.

use super::chunk_executor::{chunk_rows, Chunk, ChunkExecutor};
use super::progress::{ProgressRecord, ProgressStore};
use super::report::BatchReport;
use super::workflow::RowOutcome;
use super::{Metrics, MetricsReporter};
use crate::config::BatchConfig;
use crate::table::{RowUpdate, TableStore};
use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Decides whether an existing checkpoint should be resumed.
///
/// Called on a blocking thread, so implementations may wait for input.
pub trait ResumeDecider: Send + Sync {
    fn should_resume(&self, record: &ProgressRecord) -> bool;
}

pub struct AlwaysResume;

impl ResumeDecider for AlwaysResume {
    fn should_resume(&self, _record: &ProgressRecord) -> bool {
        true
    }
}

pub struct AlwaysFresh;

impl ResumeDecider for AlwaysFresh {
    fn should_resume(&self, _record: &ProgressRecord) -> bool {
        false
    }
}

/// Asks the operator on stdin. Without a terminal the answer is "no".
pub struct PromptResume;

impl ResumeDecider for PromptResume {
    fn should_resume(&self, record: &ProgressRecord) -> bool {
        let stdin = std::io::stdin();
        let interactive = stdin.is_terminal();
        prompt(record, interactive, stdin.lock(), std::io::stdout())
    }
}

/// Ask on `output` and read from `input`. Never reads when not interactive.
fn prompt(
    record: &ProgressRecord,
    interactive: bool,
    input: impl BufRead,
    mut output: impl Write,
) -> bool {
    if !interactive {
        tracing::info!("Found previous run ({}), no terminal attached: starting fresh", record);
        return false;
    }

    let _ = write!(output, "Found previous run: {}\nResume from previous run? (y/n): ", record);
    let _ = output.flush();
    read_answer(input)
}

/// `y`/`yes` in any case; EOF, read errors and anything else mean no.
fn read_answer(mut reader: impl BufRead) -> bool {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
    pub enable_metrics: bool,
    pub metrics_interval_secs: u64,
}

impl OrchestratorConfig {
    pub fn from_batch(batch: &BatchConfig) -> Self {
        Self {
            chunk_size: batch.chunk_size,
            inter_chunk_delay: batch.inter_chunk_delay(),
            enable_metrics: batch.enable_metrics,
            metrics_interval_secs: batch.metrics_interval_secs,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_batch(&BatchConfig::default())
    }
}

/// Where the chunk loop starts and the counts carried into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StartPoint {
    chunk_num: usize,
    completed: usize,
    failed: usize,
    resumed: bool,
}

impl StartPoint {
    const FRESH: StartPoint = StartPoint {
        chunk_num: 1,
        completed: 0,
        failed: 0,
        resumed: false,
    };
}

pub struct BatchOrchestrator {
    table: Arc<dyn TableStore>,
    executor: ChunkExecutor,
    progress: ProgressStore,
    resume: Arc<dyn ResumeDecider>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(
        table: Arc<dyn TableStore>,
        executor: ChunkExecutor,
        progress: ProgressStore,
        resume: Arc<dyn ResumeDecider>,
        metrics: Arc<Metrics>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            table,
            executor,
            progress,
            resume,
            metrics,
            config,
        }
    }

    /// Run every remaining chunk and return the aggregate report.
    pub async fn run(&self) -> Result<BatchReport> {
        let started = Instant::now();

        let rows = self
            .table
            .fetch_unprocessed()
            .await
            .context("Failed to fetch unprocessed rows")?;

        if rows.is_empty() {
            tracing::info!("No unprocessed rows");
            self.clear_progress().await;
            return Ok(BatchReport::empty(started.elapsed()));
        }

        let total_rows = rows.len();
        let chunks = chunk_rows(rows, self.config.chunk_size);
        let total_chunks = chunks.len();
        tracing::info!(
            "Found {} unprocessed rows in {} chunks of up to {}",
            total_rows,
            total_chunks,
            self.config.chunk_size
        );

        let start = self.start_point(total_chunks).await;
        if start.resumed {
            tracing::info!("Resuming from chunk {}/{}", start.chunk_num, total_chunks);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let remaining: usize = chunks.iter().skip(start.chunk_num - 1).map(|c| c.rows.len()).sum();
            let reporter = MetricsReporter::new(self.metrics.clone(), self.config.metrics_interval_secs, remaining as u64);
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let mut loop_state = ChunkLoop::new(start);
        for chunk in chunks.iter().skip(start.chunk_num - 1) {
            self.process_chunk(chunk, &mut loop_state).await;

            if chunk.chunk_num < total_chunks {
                tracing::info!(
                    "Waiting {}s before chunk {}/{}",
                    self.config.inter_chunk_delay.as_secs(),
                    chunk.chunk_num + 1,
                    total_chunks
                );
                tokio::time::sleep(self.config.inter_chunk_delay).await;
            }
        }

        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let mut report = BatchReport::from_outcomes(&loop_state.outcomes, started.elapsed());
        report.abandoned = loop_state.abandoned;
        report.unflushed = loop_state.unflushed;
        report.start_chunk = start.chunk_num;
        report.end_chunk = total_chunks;
        report.total_chunks = total_chunks;
        report.resumed = start.resumed;

        self.clear_progress().await;
        tracing::info!("Batch complete: {}", report);

        Ok(report)
    }

    /// Execute one chunk, write its results back, then checkpoint.
    async fn process_chunk(&self, chunk: &Chunk, state: &mut ChunkLoop) {
        let result = self.executor.run_chunk(chunk).await;

        let updates: Vec<RowUpdate> = result.outcomes.iter().map(RowOutcome::to_update).collect();
        if !updates.is_empty() {
            if let Err(e) = self.table.batch_write(&updates).await {
                tracing::error!(
                    "Chunk {}/{}: failed to write {} results to the table: {:#}",
                    chunk.chunk_num,
                    chunk.total_chunks,
                    updates.len(),
                    e
                );
                self.metrics.add_batch_write_failure();
                state.unflushed += updates.len();
            }
        }

        state.completed += result.succeeded();
        state.failed += result.failed();
        state.abandoned += result.abandoned.len();
        state.outcomes.extend(result.outcomes);

        if let Err(e) = self
            .progress
            .save(chunk.chunk_num, chunk.total_chunks, state.completed, state.failed)
            .await
        {
            tracing::warn!("Chunk {}/{}: {:#}", chunk.chunk_num, chunk.total_chunks, e);
        }
        self.metrics.add_chunk_completed();
    }

    async fn start_point(&self, total_chunks: usize) -> StartPoint {
        let Some(record) = self.progress.load().await else {
            return StartPoint::FRESH;
        };

        if record.chunk_num >= total_chunks {
            tracing::info!(
                "Discarding stale progress ({}), {} chunks remain",
                record,
                total_chunks
            );
            self.clear_progress().await;
            return StartPoint::FRESH;
        }

        let decider = self.resume.clone();
        let prompt_record = record.clone();
        let resume = tokio::task::spawn_blocking(move || decider.should_resume(&prompt_record))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Resume prompt failed: {}", e);
                false
            });

        if resume {
            StartPoint {
                chunk_num: record.chunk_num + 1,
                completed: record.completed_records,
                failed: record.failed_records,
                resumed: true,
            }
        } else {
            tracing::info!("Starting fresh");
            self.clear_progress().await;
            StartPoint::FRESH
        }
    }

    async fn clear_progress(&self) {
        if let Err(e) = self.progress.clear().await {
            tracing::warn!("{:#}", e);
        }
    }
}

/// Accumulators owned by the chunk loop.
struct ChunkLoop {
    outcomes: Vec<RowOutcome>,
    completed: usize,
    failed: usize,
    abandoned: usize,
    unflushed: usize,
}

impl ChunkLoop {
    fn new(start: StartPoint) -> Self {
        Self {
            outcomes: Vec::new(),
            completed: start.completed,
            failed: start.failed,
            abandoned: 0,
            unflushed: 0,
        }
    }
}
