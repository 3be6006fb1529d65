//! Bounded-concurrency execution of one chunk of rows.
//!
//! Rows run through a `buffer_unordered` pool of `max_workers` workflows.
//! Collection stops at the chunk timeout: finished outcomes are kept,
//! in-flight workflows are dropped and their rows reported as abandoned.

use super::workflow::{RowOutcome, RowWorkflow};
use super::Metrics;
use crate::table::Row;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A contiguous slice of the unprocessed rows.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based
    pub chunk_num: usize,
    pub total_chunks: usize,
    pub rows: Vec<Row>,
}

/// Split rows into chunks of at most `chunk_size`, numbered from 1.
pub fn chunk_rows(rows: Vec<Row>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let total_chunks = rows.len().div_ceil(chunk_size);

    let mut chunks = Vec::with_capacity(total_chunks);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        chunks.push(Chunk {
            chunk_num: chunks.len() + 1,
            total_chunks,
            rows: rows.by_ref().take(chunk_size).collect(),
        });
    }
    chunks
}

/// Outcomes collected for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_num: usize,
    /// In completion order
    pub outcomes: Vec<RowOutcome>,
    /// Rows still in flight when the timeout fired
    pub abandoned: Vec<usize>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ChunkResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Runs chunks through a shared row workflow.
pub struct ChunkExecutor {
    workflow: Arc<RowWorkflow>,
    max_workers: usize,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl ChunkExecutor {
    pub fn new(workflow: Arc<RowWorkflow>, max_workers: usize, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            workflow,
            max_workers: max_workers.max(1),
            timeout,
            metrics,
        }
    }

    /// Process every row of the chunk, waiting at most the chunk timeout.
    pub async fn run_chunk(&self, chunk: &Chunk) -> ChunkResult {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(chunk.rows.len());

        tracing::info!(
            "Chunk {}/{}: processing {} rows ({} workers)",
            chunk.chunk_num,
            chunk.total_chunks,
            chunk.rows.len(),
            self.max_workers
        );

        let collect = async {
            let mut pending = stream::iter(chunk.rows.iter())
                .map(|row| self.workflow.process(row))
                .buffer_unordered(self.max_workers);

            while let Some(outcome) = pending.next().await {
                outcomes.push(outcome);
            }
        };
        let timed_out = tokio::time::timeout(self.timeout, collect).await.is_err();

        let abandoned: Vec<usize> = if timed_out {
            let finished: HashSet<usize> = outcomes.iter().map(|o| o.row_index).collect();
            chunk
                .rows
                .iter()
                .map(|r| r.row_index)
                .filter(|idx| !finished.contains(idx))
                .collect()
        } else {
            Vec::new()
        };

        let result = ChunkResult {
            chunk_num: chunk.chunk_num,
            outcomes,
            abandoned,
            timed_out,
            elapsed: started.elapsed(),
        };

        if result.timed_out {
            self.metrics.add_abandoned(result.abandoned.len() as u64);
            tracing::warn!(
                "Chunk {}/{} timed out after {}s, {} rows abandoned: {:?}",
                chunk.chunk_num,
                chunk.total_chunks,
                self.timeout.as_secs(),
                result.abandoned.len(),
                result.abandoned
            );
        }

        tracing::info!(
            "Chunk {}/{} done in {:.1}s: {} succeeded, {} failed",
            chunk.chunk_num,
            chunk.total_chunks,
            result.elapsed.as_secs_f64(),
            result.succeeded(),
            result.failed()
        );

        result
    }
}
