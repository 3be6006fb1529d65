//! Street View metadata lookup and static image requests.

use super::{ApiError, Panorama, PanoramaLocator};
use crate::config::GoogleConfig;
use crate::geo::LatLng;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

const SERVICE: &str = "Street View metadata";

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: String,
    #[serde(default)]
    pano_id: Option<String>,
    #[serde(default)]
    location: Option<LatLng>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Panorama locator backed by `maps/api/streetview/metadata`.
///
/// Metadata requests are free of quota charges, so this is also the cheap
/// availability check before an image is fetched.
pub struct StreetViewLocator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StreetViewLocator {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl PanoramaLocator for StreetViewLocator {
    async fn locate(&self, target: LatLng) -> Result<Option<Panorama>> {
        let url = format!("{}/maps/api/streetview/metadata", self.base_url);
        let location = target.to_string();
        let response = self
            .client
            .get(url)
            .query(&[("location", location.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ApiError::http(SERVICE, e))?;

        let response = ApiError::check_status(SERVICE, response).await?;
        let body: MetadataResponse = response.json().await.map_err(|e| ApiError::http(SERVICE, e))?;

        match body.status.as_str() {
            "OK" => Ok(match (body.pano_id, body.location) {
                (Some(pano_id), Some(location)) if !pano_id.is_empty() && location.is_valid() => {
                    Some(Panorama { pano_id, location })
                }
                _ => None,
            }),
            "ZERO_RESULTS" | "NOT_FOUND" => Ok(None),
            other => Err(ApiError::status(SERVICE, other, body.error_message.as_deref()).into()),
        }
    }
}

/// Builds static Street View image URLs for a panorama and heading.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    base_url: String,
    api_key: String,
    size: String,
    pitch: f64,
    fov: f64,
}

impl ImageRequest {
    pub fn new(config: &GoogleConfig) -> Result<Self> {
        let api_key = config.api_key.clone().context("Missing Google API key")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            size: config.image.size.clone(),
            pitch: config.image.pitch,
            fov: config.image.fov,
        })
    }

    /// Image URL looking from the panorama along `heading` degrees.
    pub fn url_for(&self, pano_id: &str, heading: f64) -> Result<String> {
        let heading = format!("{:.2}", heading);
        let pitch = self.pitch.to_string();
        let fov = self.fov.to_string();

        let url = Url::parse_with_params(
            &format!("{}/maps/api/streetview", self.base_url),
            &[
                ("size", self.size.as_str()),
                ("pano", pano_id),
                ("heading", heading.as_str()),
                ("pitch", pitch.as_str()),
                ("fov", fov.as_str()),
                ("key", self.api_key.as_str()),
            ],
        )?;
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn locator_with(body: serde_json::Value) -> (MockServer, StreetViewLocator) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/streetview/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        let locator = StreetViewLocator::new(reqwest::Client::new(), &server.uri(), "k");
        (server, locator)
    }

    #[tokio::test]
    async fn test_locate_ok_returns_camera_position() {
        let (_server, locator) = locator_with(json!({
            "status": "OK",
            "pano_id": "abc123",
            "location": {"lat": 37.4221, "lng": -122.0841}
        }))
        .await;

        let pano = locator.locate(LatLng::new(37.422, -122.084)).await.unwrap().unwrap();
        assert_eq!(pano.pano_id, "abc123");
        assert_eq!(pano.location, LatLng::new(37.4221, -122.0841));
    }

    #[tokio::test]
    async fn test_locate_zero_results() {
        let (_server, locator) = locator_with(json!({"status": "ZERO_RESULTS"})).await;
        assert!(locator.locate(LatLng::new(0.0, 0.0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locate_ok_without_pano_id() {
        let (_server, locator) = locator_with(json!({"status": "OK"})).await;
        assert!(locator.locate(LatLng::new(0.0, 0.0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locate_sends_location_pair() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("location", "1.5,-2.25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "NOT_FOUND"})))
            .expect(1)
            .mount(&server)
            .await;

        let locator = StreetViewLocator::new(reqwest::Client::new(), &server.uri(), "k");
        assert!(locator.locate(LatLng::new(1.5, -2.25)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locate_request_denied_is_error() {
        let (_server, locator) = locator_with(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid."
        }))
        .await;
        let err = locator.locate(LatLng::new(0.0, 0.0)).await.unwrap_err();
        assert!(err.to_string().contains("REQUEST_DENIED"));
    }

    #[test]
    fn test_image_url() {
        let config = GoogleConfig {
            api_key: Some("secret".to_string()),
            ..GoogleConfig::default()
        };
        let request = ImageRequest::new(&config).unwrap();
        let url = request.url_for("pano-1", 93.456).unwrap();

        assert!(url.starts_with("https://maps.googleapis.com/maps/api/streetview?"));
        assert!(url.contains("size=560x430"));
        assert!(url.contains("pano=pano-1"));
        assert!(url.contains("heading=93.46"));
        assert!(url.contains("pitch=10"));
        assert!(url.contains("fov=70"));
        assert!(url.contains("key=secret"));
    }

    #[test]
    fn test_image_request_needs_key() {
        assert!(ImageRequest::new(&GoogleConfig::default()).is_err());
    }
}
