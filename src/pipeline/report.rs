//! Final run summary.

use super::workflow::{OutcomeStatus, RowOutcome};
use serde::{Serialize, Serializer};
use std::time::Duration;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Aggregate result of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Rows that reached a terminal outcome
    pub processed: usize,
    pub succeeded: usize,
    pub permanent_failures: usize,
    pub transient_failures: usize,
    /// Rows outstanding when a chunk timed out
    pub abandoned: usize,
    /// Rows whose results could not be written back to the table
    pub unflushed: usize,
    pub retries: u64,
    /// First chunk processed in this run (1-based)
    pub start_chunk: usize,
    /// Last chunk processed in this run
    pub end_chunk: usize,
    pub total_chunks: usize,
    pub resumed: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl BatchReport {
    /// Report for a run that found nothing to do.
    pub fn empty(elapsed: Duration) -> Self {
        Self {
            elapsed,
            ..Self::default()
        }
    }

    /// Tally outcomes; run bookkeeping fields are filled by the caller.
    pub fn from_outcomes(outcomes: &[RowOutcome], elapsed: Duration) -> Self {
        let mut report = Self::empty(elapsed);
        for outcome in outcomes {
            report.processed += 1;
            match outcome.status {
                OutcomeStatus::Success => report.succeeded += 1,
                OutcomeStatus::PermanentFailure => report.permanent_failures += 1,
                OutcomeStatus::TransientFailure => report.transient_failures += 1,
            }
            report.retries += u64::from(outcome.attempts.saturating_sub(1));
        }
        report
    }

    pub fn failed(&self) -> usize {
        self.permanent_failures + self.transient_failures
    }

    /// Percentage of processed rows that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.processed > 0 {
            self.succeeded as f64 / self.processed as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Wall-clock time per processed row.
    pub fn avg_per_record(&self) -> Duration {
        if self.processed > 0 {
            Duration::from_secs_f64(self.elapsed.as_secs_f64() / self.processed as f64)
        } else {
            Duration::ZERO
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Batch Summary ===");
        if self.total_chunks == 0 {
            println!("No unprocessed rows");
        } else {
            println!(
                "Chunks: {}..={} of {}{}",
                self.start_chunk,
                self.end_chunk,
                self.total_chunks,
                if self.resumed { " (resumed)" } else { "" }
            );
        }
        println!("Total processed: {}", self.processed);
        println!("Successful: {}", self.succeeded);
        println!(
            "Failed: {} ({} permanent, {} transient)",
            self.failed(),
            self.permanent_failures,
            self.transient_failures
        );
        println!("Retries: {}", self.retries);
        if self.abandoned > 0 {
            println!("Abandoned at chunk timeout: {}", self.abandoned);
        }
        if self.unflushed > 0 {
            println!("Not written to table: {}", self.unflushed);
        }
        println!("Success rate: {:.1}%", self.success_rate());
        println!("Total time: {:.1}s", self.elapsed.as_secs_f64());
        println!("Average per record: {:.2}s", self.avg_per_record().as_secs_f64());
        println!("=====================\n");
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processed: {}, Succeeded: {}, Failed: {}, Abandoned: {}, Success rate: {:.1}%, Elapsed: {:.1}s",
            self.processed,
            self.succeeded,
            self.failed(),
            self.abandoned,
            self.success_rate(),
            self.elapsed.as_secs_f64()
        )
    }
}
