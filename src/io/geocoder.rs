//! Google Geocoding API client.

use super::{ApiError, Geocoder};
use crate::geo::LatLng;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

const SERVICE: &str = "Geocoding API";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

/// Geocoder backed by `maps/api/geocode/json`.
pub struct GoogleGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<LatLng>> {
        let url = format!("{}/maps/api/geocode/json", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ApiError::http(SERVICE, e))?;

        let response = ApiError::check_status(SERVICE, response).await?;
        let body: GeocodeResponse = response.json().await.map_err(|e| ApiError::http(SERVICE, e))?;

        match body.status.as_str() {
            "OK" => Ok(body
                .results
                .into_iter()
                .next()
                .map(|r| r.geometry.location)
                .filter(LatLng::is_valid)),
            "ZERO_RESULTS" => Ok(None),
            other => Err(ApiError::status(SERVICE, other, body.error_message.as_deref()).into()),
        }
    }
}
