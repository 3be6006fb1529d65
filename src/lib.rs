//! Street View Batch Enricher
//!
//! Resumable, chunked batch pipeline that enriches address rows with a
//! geocoded Street View image and writes the result back to the table.
//!
//! # Architecture
//!
//! - **Table**: source of unprocessed rows and sink for results (Google Sheets or in-memory)
//! - **I/O**: geocoder, panorama locator, image publisher and checkpoint storage
//! - **Pipeline**: per-row workflow with retries, bounded chunk executor,
//!   progress checkpoints and the chunk orchestrator
//! - **Shutdown**: run-time watchdog and escalating process exit
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use streetview_batch::{pipeline::AlwaysFresh, run_batch, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.yaml".as_ref())?;
//!     config.resolve_env();
//!     let report = run_batch(config, Arc::new(AlwaysFresh)).await?;
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod geo;
pub mod io;
pub mod pipeline;
pub mod shutdown;
pub mod table;

pub use config::Config;
pub use geo::{bearing, normalize_identifier, LatLng};
pub use pipeline::{BatchOrchestrator, BatchReport, ChunkExecutor, Metrics, ProgressStore, RowWorkflow};
pub use table::{MemoryTable, Row, SheetsTable, TableStore};

use anyhow::Result;
use pipeline::{OrchestratorConfig, ResumeDecider, RetryPolicy};
use std::sync::Arc;

/// Run the batch against the configured Google Sheet, Google Maps and Cloudinary.
pub async fn run_batch(config: Config, resume: Arc<dyn ResumeDecider>) -> Result<BatchReport> {
    config.validate()?;

    tracing::info!("Starting Street View batch");

    let client = io::build_http_client(config.batch.request_timeout())?;
    let api_key = config.google.api_key.as_deref().unwrap_or_default();

    let table: Arc<dyn TableStore> = Arc::new(SheetsTable::new(client.clone(), &config.table)?);
    let geocoder = Arc::new(io::GoogleGeocoder::new(client.clone(), &config.google.base_url, api_key));
    let locator = Arc::new(io::StreetViewLocator::new(client.clone(), &config.google.base_url, api_key));
    let publisher = Arc::new(io::CloudinaryPublisher::new(client, &config.publisher)?);
    let image = io::ImageRequest::new(&config.google)?;

    let progress = ProgressStore::open(&config.batch.progress_path)?;
    tracing::info!("Progress checkpoint: {}", config.batch.progress_path);

    let metrics = Metrics::new();

    let workflow = Arc::new(RowWorkflow::new(
        geocoder,
        locator,
        publisher,
        image,
        RetryPolicy::from_config(&config.retry),
        metrics.clone(),
    ));

    let executor = ChunkExecutor::new(
        workflow,
        config.batch.max_workers,
        config.batch.chunk_timeout(),
        metrics.clone(),
    );

    let orchestrator = BatchOrchestrator::new(
        table,
        executor,
        progress,
        resume,
        metrics,
        OrchestratorConfig::from_batch(&config.batch),
    );

    orchestrator.run().await
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
