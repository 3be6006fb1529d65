//! Configuration for the Street View batch pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the batch pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunking, concurrency and timing
    #[serde(default)]
    pub batch: BatchConfig,

    /// Per-row retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,

    /// Spreadsheet holding the address rows
    #[serde(default)]
    pub table: TableConfig,

    /// Google Maps Platform settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Image host settings
    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// Batch orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between chunks, paces the run against upstream quotas
    #[serde(default = "default_inter_chunk_delay_secs")]
    pub inter_chunk_delay_secs: u64,

    /// Concurrent row workflows per chunk
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Wall-clock cap for collecting one chunk's outcomes
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Absolute ceiling for the whole run, enforced by the watchdog
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,

    /// Checkpoint location: a local path or `s3://bucket/key`
    #[serde(default = "default_progress_path")]
    pub progress_path: String,

    /// Timeout applied to every outbound HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable periodic progress logging
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

impl BatchConfig {
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_secs(self.inter_chunk_delay_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250,
            inter_chunk_delay_secs: 30,
            max_workers: 8,
            chunk_timeout_secs: 600,
            max_runtime_secs: 1800,
            progress_path: default_progress_path(),
            request_timeout_secs: 30,
            enable_metrics: true,
            metrics_interval_secs: 30,
        }
    }
}

/// Retry configuration for transient row failures. The delay is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each retry in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay_ms: 3000,
        }
    }
}

/// Google Sheets table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Spreadsheet key (the long id in the sheet URL)
    #[serde(default)]
    pub spreadsheet_id: Option<String>,

    /// Worksheet (tab) name
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    /// OAuth bearer token; falls back to GOOGLE_SHEETS_ACCESS_TOKEN
    #[serde(default)]
    pub access_token: Option<String>,

    /// Sheets API endpoint
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,

    /// Header names of the columns the pipeline reads and writes
    #[serde(default)]
    pub columns: ColumnConfig,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: default_sheet_name(),
            access_token: None,
            base_url: default_sheets_base_url(),
            columns: ColumnConfig::default(),
        }
    }
}

/// Header names in the first row of the worksheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_street_column")]
    pub street: String,
    #[serde(default = "default_city_column")]
    pub city: String,
    #[serde(default = "default_state_column")]
    pub state: String,
    #[serde(default = "default_postal_code_column")]
    pub postal_code: String,
    /// Published image URL; rows with an empty value here are unprocessed
    #[serde(default = "default_output_column")]
    pub output: String,
    #[serde(default = "default_status_column")]
    pub status: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            street: default_street_column(),
            city: default_city_column(),
            state: default_state_column(),
            postal_code: default_postal_code_column(),
            output: default_output_column(),
            status: default_status_column(),
        }
    }
}

/// Google Maps Platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// API key; falls back to GOOGLE_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maps API endpoint
    #[serde(default = "default_google_base_url")]
    pub base_url: String,

    /// Street View image parameters
    #[serde(default)]
    pub image: ImageConfig,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_google_base_url(),
            image: ImageConfig::default(),
        }
    }
}

/// Street View static image parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// `WIDTHxHEIGHT` in pixels
    #[serde(default = "default_image_size")]
    pub size: String,

    /// Camera pitch in degrees
    #[serde(default = "default_pitch")]
    pub pitch: f64,

    /// Horizontal field of view in degrees
    #[serde(default = "default_fov")]
    pub fov: f64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: default_image_size(),
            pitch: default_pitch(),
            fov: default_fov(),
        }
    }
}

/// Cloudinary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Falls back to CLOUDINARY_CLOUD_NAME
    #[serde(default)]
    pub cloud_name: Option<String>,

    /// Falls back to CLOUDINARY_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,

    /// Falls back to CLOUDINARY_API_SECRET
    #[serde(default)]
    pub api_secret: Option<String>,

    /// Unsigned upload preset. When set, uploads are not signed.
    #[serde(default)]
    pub upload_preset: Option<String>,

    /// Optional folder prepended to every public id
    #[serde(default)]
    pub folder: Option<String>,

    /// Upload API endpoint
    #[serde(default = "default_cloudinary_base_url")]
    pub base_url: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            upload_preset: None,
            folder: None,
            base_url: default_cloudinary_base_url(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON; an empty file deserializes to all defaults
                if contents.trim().is_empty() {
                    Config::default()
                } else {
                    serde_yaml::from_str(&contents)?
                }
            }
        };
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    ///
    /// The pipeline has no required flags: credentials can come entirely
    /// from the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Fill unset secrets from environment variables.
    pub fn resolve_env(&mut self) {
        self.resolve_with(|key| std::env::var(key).ok());
    }

    fn resolve_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value.filter(|v| !v.trim().is_empty());
            }
        }

        fill(&mut self.google.api_key, lookup("GOOGLE_API_KEY"));
        fill(&mut self.table.access_token, lookup("GOOGLE_SHEETS_ACCESS_TOKEN"));
        fill(&mut self.table.spreadsheet_id, lookup("GOOGLE_SHEET_ID"));
        fill(&mut self.publisher.cloud_name, lookup("CLOUDINARY_CLOUD_NAME"));
        fill(&mut self.publisher.api_key, lookup("CLOUDINARY_API_KEY"));
        fill(&mut self.publisher.api_secret, lookup("CLOUDINARY_API_SECRET"));
    }

    /// Validate the batch settings only (enough for offline commands).
    pub fn validate_batch(&self) -> anyhow::Result<()> {
        if self.batch.chunk_size == 0 {
            anyhow::bail!("Chunk size must be > 0");
        }
        if self.batch.max_workers == 0 {
            anyhow::bail!("Worker count must be > 0");
        }
        if self.batch.chunk_timeout_secs == 0 {
            anyhow::bail!("Chunk timeout must be > 0");
        }
        if self.batch.max_runtime_secs == 0 {
            anyhow::bail!("Maximum runtime must be > 0");
        }
        if self.batch.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }
        if self.batch.progress_path.trim().is_empty() {
            anyhow::bail!("Progress path must not be empty");
        }
        Ok(())
    }

    /// Validate the full configuration, including credentials.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_batch()?;

        if self.table.spreadsheet_id.is_none() {
            anyhow::bail!("Missing table.spreadsheet_id (or GOOGLE_SHEET_ID)");
        }
        if self.table.access_token.is_none() {
            anyhow::bail!("Missing table.access_token (or GOOGLE_SHEETS_ACCESS_TOKEN)");
        }
        if self.google.api_key.is_none() {
            anyhow::bail!("Missing google.api_key (or GOOGLE_API_KEY)");
        }
        if self.publisher.cloud_name.is_none() {
            anyhow::bail!("Missing publisher.cloud_name (or CLOUDINARY_CLOUD_NAME)");
        }
        match (&self.publisher.upload_preset, &self.publisher.api_key, &self.publisher.api_secret) {
            (Some(_), _, _) => {}
            (None, Some(_), Some(_)) => {}
            _ => anyhow::bail!(
                "Signed uploads need publisher.api_key and publisher.api_secret, or set publisher.upload_preset"
            ),
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_chunk_size() -> usize { 250 }
fn default_inter_chunk_delay_secs() -> u64 { 30 }
fn default_max_workers() -> usize { 8 }
fn default_chunk_timeout_secs() -> u64 { 600 }
fn default_max_runtime_secs() -> u64 { 1800 }
fn default_progress_path() -> String { "batch_progress.json".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 30 }
fn default_max_retries() -> u32 { 1 }
fn default_retry_delay_ms() -> u64 { 3000 }
fn default_sheet_name() -> String { "Sheet1".to_string() }
fn default_sheets_base_url() -> String { "https://sheets.googleapis.com".to_string() }
fn default_street_column() -> String { "address".to_string() }
fn default_city_column() -> String { "city".to_string() }
fn default_state_column() -> String { "state".to_string() }
fn default_postal_code_column() -> String { "zip_code".to_string() }
fn default_output_column() -> String { "image_URL".to_string() }
fn default_status_column() -> String { "Processing Status".to_string() }
fn default_google_base_url() -> String { "https://maps.googleapis.com".to_string() }
fn default_image_size() -> String { "560x430".to_string() }
fn default_pitch() -> f64 { 10.0 }
fn default_fov() -> f64 { 70.0 }
fn default_cloudinary_base_url() -> String { "https://api.cloudinary.com".to_string() }
