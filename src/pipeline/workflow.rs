//! Per-row workflow: geocode, locate panorama, compute bearing, publish.
//!
//! Every failure is converted into a [`RowOutcome`]; nothing escapes
//! [`RowWorkflow::process`]. Retries re-run the whole workflow for the row.

use super::retry::{classify, FailureKind, RetryDecision, RetryPolicy};
use super::Metrics;
use crate::geo::{bearing, normalize_identifier};
use crate::io::{Geocoder, ImagePublisher, ImageRequest, ImageSource, PanoramaLocator};
use crate::table::{Row, RowUpdate};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Instant;

pub const GEOCODING_FAILED: &str = "Geocoding failed";
pub const NO_PANORAMA: &str = "Street View metadata not available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    PermanentFailure,
    TransientFailure,
}

/// Terminal result for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub row_index: usize,
    pub status: OutcomeStatus,
    /// Present iff `status` is `Success`
    pub published_url: Option<String>,
    /// Present iff `status` is not `Success`
    pub message: Option<String>,
    /// Workflow attempts, including the first
    pub attempts: u32,
}

impl RowOutcome {
    pub fn success(row_index: usize, published_url: String, attempts: u32) -> Self {
        Self {
            row_index,
            status: OutcomeStatus::Success,
            published_url: Some(published_url),
            message: None,
            attempts,
        }
    }

    pub fn failure(row_index: usize, kind: FailureKind, message: String, attempts: u32) -> Self {
        let status = match kind {
            FailureKind::Permanent => OutcomeStatus::PermanentFailure,
            FailureKind::Transient => OutcomeStatus::TransientFailure,
        };
        Self {
            row_index,
            status,
            published_url: None,
            message: Some(message),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Cell values written back to the table. Failures leave the output
    /// empty so a later run picks the row up again.
    pub fn to_update(&self) -> RowUpdate {
        match (&self.status, &self.published_url) {
            (OutcomeStatus::Success, Some(url)) => RowUpdate {
                row_index: self.row_index,
                value: url.clone(),
                status: "Success".to_string(),
            },
            _ => RowUpdate {
                row_index: self.row_index,
                value: String::new(),
                status: format!("Error: {}", self.message.as_deref().unwrap_or("unknown error")),
            },
        }
    }
}

/// Image host identifier for a row: `street_city_zip`, normalized.
pub fn public_id(row: &Row) -> String {
    [&row.street, &row.city, &row.postal_code]
        .iter()
        .map(|part| normalize_identifier(part))
        .collect::<Vec<_>>()
        .join("_")
}

/// Runs the four-step pipeline for a row with retries.
pub struct RowWorkflow {
    geocoder: Arc<dyn Geocoder>,
    locator: Arc<dyn PanoramaLocator>,
    publisher: Arc<dyn ImagePublisher>,
    image: ImageRequest,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl RowWorkflow {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        locator: Arc<dyn PanoramaLocator>,
        publisher: Arc<dyn ImagePublisher>,
        image: ImageRequest,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            geocoder,
            locator,
            publisher,
            image,
            retry,
            metrics,
        }
    }

    /// Process a row to a terminal outcome.
    pub async fn process(&self, row: &Row) -> RowOutcome {
        let mut retries = 0;

        loop {
            match self.attempt(row).await {
                Ok(url) => {
                    self.metrics.add_success();
                    tracing::debug!("Row {} published: {}", row.row_index, url);
                    return RowOutcome::success(row.row_index, url, retries + 1);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    match self.retry.should_retry(&message, retries) {
                        RetryDecision::Retry(delay) => {
                            tracing::warn!(
                                "Row {} attempt {} failed: {}, retrying in {}ms",
                                row.row_index,
                                retries + 1,
                                message,
                                delay.as_millis()
                            );
                            self.metrics.add_retry();
                            retries += 1;
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            let kind = classify(&message);
                            match kind {
                                FailureKind::Permanent => self.metrics.add_permanent_failure(),
                                FailureKind::Transient => self.metrics.add_transient_failure(),
                            }
                            tracing::error!(
                                "Row {} failed after {} attempts: {}",
                                row.row_index,
                                retries + 1,
                                message
                            );
                            return RowOutcome::failure(row.row_index, kind, message, retries + 1);
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&self, row: &Row) -> Result<String> {
        let address = row.full_address();

        let started = Instant::now();
        let geocoded = self.geocoder.geocode(&address).await;
        self.metrics.add_geocode_time(started.elapsed());
        let target = geocoded?.ok_or_else(|| anyhow!(GEOCODING_FAILED))?;

        let started = Instant::now();
        let located = self.locator.locate(target).await;
        self.metrics.add_locate_time(started.elapsed());
        let panorama = located?.ok_or_else(|| anyhow!(NO_PANORAMA))?;

        // Face the address from where the camera stands
        let heading = bearing(panorama.location, target);
        let image_url = self.image.url_for(&panorama.pano_id, heading)?;

        let started = Instant::now();
        let published = self
            .publisher
            .publish(ImageSource::Url(image_url), &public_id(row))
            .await;
        self.metrics.add_publish_time(started.elapsed());
        published
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted collaborators shared by workflow, executor and orchestrator tests.

    use super::*;
    use crate::config::GoogleConfig;
    use crate::geo::LatLng;
    use crate::io::{ApiError, Panorama};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Geocodes addresses whose street is not listed in `unknown`.
    #[derive(Default)]
    pub struct FakeGeocoder {
        pub unknown: HashSet<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeGeocoder {
        pub fn unknown(streets: &[&str]) -> Self {
            Self {
                unknown: streets.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, address: &str) -> Result<Option<LatLng>> {
            self.calls.lock().unwrap().push(address.to_string());
            if self.unknown.iter().any(|street| address.starts_with(street.as_str())) {
                return Ok(None);
            }
            Ok(Some(LatLng::new(47.6205, -122.3493)))
        }
    }

    /// Always finds a panorama just south of the target.
    pub struct FakeLocator;

    #[async_trait]
    impl PanoramaLocator for FakeLocator {
        async fn locate(&self, target: LatLng) -> Result<Option<Panorama>> {
            Ok(Some(Panorama {
                pano_id: "pano-1".to_string(),
                location: LatLng::new(target.lat - 0.0002, target.lng),
            }))
        }
    }

    /// Publisher whose behavior is scripted per public id.
    #[derive(Default)]
    pub struct FakePublisher {
        /// Number of leading calls per id that fail with a timeout
        pub timeouts: Mutex<HashMap<String, u32>>,
        /// Ids whose publish never completes
        pub hangs: HashSet<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakePublisher {
        pub fn timing_out(id: &str, times: u32) -> Self {
            let publisher = Self::default();
            publisher.timeouts.lock().unwrap().insert(id.to_string(), times);
            publisher
        }

        pub fn hanging(ids: &[&str]) -> Self {
            Self {
                hangs: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn calls_for(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| c.as_str() == id).count()
        }
    }

    #[async_trait]
    impl ImagePublisher for FakePublisher {
        async fn publish(&self, source: ImageSource, public_id: &str) -> Result<String> {
            assert!(matches!(source, ImageSource::Url(ref u) if u.contains("pano=pano-1")));
            self.calls.lock().unwrap().push(public_id.to_string());

            if self.hangs.contains(public_id) {
                std::future::pending::<()>().await;
            }

            let fail = {
                let mut timeouts = self.timeouts.lock().unwrap();
                match timeouts.get_mut(public_id) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if fail {
                tokio::time::sleep(Duration::from_millis(10)).await;
                return Err(ApiError::Timeout { service: "Cloudinary" }.into());
            }

            Ok(format!("https://img.example/{}.jpg", public_id))
        }
    }

    pub fn image_request() -> ImageRequest {
        let config = GoogleConfig {
            api_key: Some("test-key".to_string()),
            ..GoogleConfig::default()
        };
        ImageRequest::new(&config).unwrap()
    }

    pub fn workflow(
        geocoder: Arc<FakeGeocoder>,
        publisher: Arc<FakePublisher>,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> RowWorkflow {
        RowWorkflow::new(geocoder, Arc::new(FakeLocator), publisher, image_request(), retry, metrics)
    }
}
