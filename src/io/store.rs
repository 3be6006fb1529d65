//! Object store access for the progress checkpoint.
//!
//! A checkpoint location is either a local file path or an `s3://bucket/key`
//! URI. Local writes go through `LocalFileSystem`, which stages into a
//! temporary file and renames, so a crash never leaves a half-written record.

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

/// Client options for the occasional small checkpoint write.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
}

fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(60),
    }
}

/// Create an authenticated S3 client.
///
/// Credentials and region come from the usual AWS environment variables,
/// config files or instance profile.
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_virtual_hosted_style_request(true);

    Ok(Arc::new(builder.build()?))
}

/// Open the store holding `location` and return it with the object path.
///
/// Local parents are created on demand.
pub fn open_location(location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
    if location.starts_with("s3://") {
        let (bucket, key) = parse_s3_uri(location)?;
        let store = create_authenticated_store(bucket)?;
        return Ok((store, ObjectPath::from(key)));
    }

    let path = std::path::Path::new(location);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid progress location: '{}'", location))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    if !parent.exists() {
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    tracing::debug!("Opening LocalFileSystem store at: {}", parent.display());
    let store = LocalFileSystem::new_with_prefix(&parent)?;
    Ok((Arc::new(store), ObjectPath::from(file_name)))
}
