//! Street View Batch CLI
//!
//! Enriches address rows in a Google Sheet with Street View images.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streetview_batch::pipeline::{AlwaysFresh, AlwaysResume, PromptResume, ResumeDecider};
use streetview_batch::shutdown::{self, Watchdog};
use streetview_batch::{build_runtime, run_batch, Config, ProgressStore};

#[derive(Parser)]
#[command(name = "streetview-batch")]
#[command(about = "Enrich address rows with geocoded Street View images", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override rows per chunk
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Override concurrent row workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Resume from an existing checkpoint without asking
    #[arg(long, conflicts_with = "fresh", global = true)]
    resume: bool,

    /// Ignore any existing checkpoint
    #[arg(long, global = true)]
    fresh: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Show the current progress checkpoint
    Status,

    /// Remove the progress checkpoint
    Reset,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

impl Cli {
    fn resume_decider(&self) -> Arc<dyn ResumeDecider> {
        if self.resume {
            Arc::new(AlwaysResume)
        } else if self.fresh {
            Arc::new(AlwaysFresh)
        } else {
            Arc::new(PromptResume)
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        None | Some(Commands::Run) => run_command(&cli)?,

        Some(Commands::Validate) => validate_command(&cli)?,

        Some(Commands::Status) => status_command(&cli)?,

        Some(Commands::Reset) => reset_command(&cli)?,

        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
    }

    Ok(())
}

/// Load the config file, apply CLI overrides and fill secrets from the environment.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;

    if let Some(size) = cli.chunk_size {
        config.batch.chunk_size = size;
    }
    if let Some(workers) = cli.workers {
        config.batch.max_workers = workers;
    }

    config.resolve_env();
    Ok(config)
}

fn print_banner(config: &Config) {
    println!("\n=== Street View Batch ===");
    println!("Chunk size: {}", config.batch.chunk_size);
    println!("Delay between chunks: {}s", config.batch.inter_chunk_delay_secs);
    println!("Workers: {}", config.batch.max_workers);
    println!("Chunk timeout: {}s", config.batch.chunk_timeout_secs);
    println!("Maximum runtime: {}s", config.batch.max_runtime_secs);
    println!(
        "Retries: {} after {}ms",
        config.retry.max_retries, config.retry.retry_delay_ms
    );
    println!("Progress file: {}", config.batch.progress_path);
    println!("=========================\n");
}

fn run_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate()?;
    print_banner(&config);

    let watchdog = Watchdog::arm(config.batch.max_runtime())?;
    let runtime = build_runtime(None)?;

    let result = runtime.block_on(run_batch(config, cli.resume_decider()));
    watchdog.disarm();

    let code = match result {
        Ok(report) => {
            report.print_summary();
            0
        }
        Err(e) => {
            tracing::error!("Batch failed: {:#}", e);
            1
        }
    };

    shutdown::exit_process(runtime, code)
}

fn validate_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn status_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate_batch()?;

    let runtime = build_runtime(Some(1))?;
    runtime.block_on(async {
        let progress = ProgressStore::open(&config.batch.progress_path)?;
        match progress.load().await {
            Some(record) => println!("Checkpoint {}: {}", config.batch.progress_path, record),
            None => println!("No checkpoint at {}", config.batch.progress_path),
        }
        Ok(())
    })
}

fn reset_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate_batch()?;

    let runtime = build_runtime(Some(1))?;
    runtime.block_on(async {
        ProgressStore::open(&config.batch.progress_path)?.clear().await?;
        println!("Cleared checkpoint at {}", config.batch.progress_path);
        Ok(())
    })
}

fn generate_config_command(output: &Path) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Street View Batch Configuration
#
# Secrets may be left out and supplied through the environment (or a .env file):
#   GOOGLE_API_KEY, GOOGLE_SHEETS_ACCESS_TOKEN, GOOGLE_SHEET_ID,
#   CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY, CLOUDINARY_API_SECRET

# === BATCH: Chunking, pacing and limits ===
batch:
  # Rows per chunk; progress is checkpointed after every chunk
  chunk_size: 250

  # Pause between chunks to stay under upstream rate limits
  inter_chunk_delay_secs: 30

  # Rows processed concurrently within a chunk
  max_workers: 8

  # Rows still running after this long are abandoned for this run
  chunk_timeout_secs: 600

  # Hard ceiling for the whole run; the process is terminated after it
  max_runtime_secs: 1800

  # Checkpoint location: local path or s3://bucket/key
  progress_path: "batch_progress.json"

  # Per-request HTTP timeout
  request_timeout_secs: 30

  # Log throughput metrics during the run
  enable_metrics: true
  metrics_interval_secs: 30

# === RETRY: Transient failures (network, rate limits) ===
retry:
  # Extra attempts after the first one
  max_retries: 1
  retry_delay_ms: 3000

# === TABLE: Google Sheet holding the addresses ===
table:
  # spreadsheet_id: "1AbC..."
  sheet_name: "Sheet1"

  # Header names of the columns used
  columns:
    street: "address"
    city: "city"
    state: "state"
    postal_code: "zip_code"
    output: "image_URL"
    status: "Processing Status"

# === GOOGLE: Geocoding and Street View ===
google:
  # api_key: "..."
  image:
    size: "560x430"
    pitch: 10
    fov: 70

# === PUBLISHER: Cloudinary ===
publisher:
  # cloud_name: "my-cloud"

  # Signed uploads (api_key + api_secret) ...
  # api_key: "..."
  # api_secret: "..."

  # ... or unsigned uploads through a preset
  # upload_preset: "street_view"

  # Optional folder prefix for public ids
  # folder: "street_view"
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["streetview-batch"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_overrides() {
        let cli = Cli::try_parse_from(["streetview-batch", "-c", "other.yaml", "--chunk-size", "50", "--workers", "4"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
        assert_eq!(cli.chunk_size, Some(50));
        assert_eq!(cli.workers, Some(4));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["streetview-batch", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_resume_and_fresh_conflict() {
        assert!(Cli::try_parse_from(["streetview-batch", "--resume", "--fresh"]).is_err());
        assert!(Cli::try_parse_from(["streetview-batch", "--resume"]).unwrap().resume);
        assert!(Cli::try_parse_from(["streetview-batch", "--fresh"]).unwrap().fresh);
    }

    #[test]
    fn test_resume_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["streetview-batch", "run", "--fresh"]).unwrap();
        assert!(cli.fresh);
        assert!(matches!(cli.command, Some(Commands::Run)));

        let cli = Cli::try_parse_from(["streetview-batch", "run", "--resume", "--workers", "4"]).unwrap();
        assert!(cli.resume);
        assert_eq!(cli.workers, Some(4));

        assert!(Cli::try_parse_from(["streetview-batch", "run", "--resume", "--fresh"]).is_err());
    }

    #[test]
    fn test_generated_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        generate_config_command(&path).unwrap();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.batch.chunk_size, 250);
        assert_eq!(config.batch.max_workers, 8);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.table.columns.status, "Processing Status");
        assert_eq!(config.google.image.size, "560x430");
        config.validate_batch().unwrap();
    }
}
