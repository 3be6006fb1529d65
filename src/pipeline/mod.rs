//! Batch pipeline: row workflow, retries, chunk execution, checkpoints and
//! the orchestrator that drives them.

mod chunk_executor;
mod metrics;
mod orchestrator;
mod progress;
mod report;
mod retry;
mod workflow;

#[cfg(test)]
mod integration_tests;

pub use chunk_executor::{chunk_rows, Chunk, ChunkExecutor, ChunkResult};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use orchestrator::{
    AlwaysFresh, AlwaysResume, BatchOrchestrator, OrchestratorConfig, PromptResume, ResumeDecider,
};
pub use progress::{ProgressRecord, ProgressStore};
pub use report::BatchReport;
pub use retry::{classify, FailureKind, RetryDecision, RetryPolicy};
pub use workflow::{public_id, OutcomeStatus, RowOutcome, RowWorkflow};
