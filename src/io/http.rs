//! Shared HTTP client.
//!
//! One client (and its connection pool) is built per run and handed to every
//! collaborator.

use anyhow::Result;
use std::time::Duration;

/// Build the client used for all outbound calls.
///
/// - `request_timeout` bounds each request end to end
/// - connections are pooled per host and kept for 90s when idle
pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10).min(request_timeout))
        .timeout(request_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
