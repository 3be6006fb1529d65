//! Cloudinary image publisher.
//!
//! Remote sources are downloaded by this process and uploaded as bytes, so
//! the URL (and the Google key inside it) is never handed to the image host.

use super::{ApiError, ImagePublisher, ImageSource};
use crate::config::PublisherConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};

const SERVICE: &str = "Cloudinary";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    error: Option<UploadError>,
}

#[derive(Debug, Deserialize)]
struct UploadError {
    message: String,
}

#[derive(Debug, Clone)]
enum Credentials {
    Signed { api_key: String, api_secret: String },
    Unsigned { upload_preset: String },
}

/// String-to-sign: `key=value` pairs sorted by key and joined with `&`.
fn signing_payload(params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex SHA-256 of the payload followed by the API secret.
fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signing_payload(params).as_bytes());
    hasher.update(api_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Publisher backed by the Cloudinary upload API.
pub struct CloudinaryPublisher {
    client: reqwest::Client,
    upload_url: String,
    credentials: Credentials,
    folder: Option<String>,
}

impl CloudinaryPublisher {
    pub fn new(client: reqwest::Client, config: &PublisherConfig) -> Result<Self> {
        let cloud_name = config.cloud_name.as_deref().context("Missing Cloudinary cloud name")?;

        let credentials = match (&config.upload_preset, &config.api_key, &config.api_secret) {
            (Some(preset), _, _) => Credentials::Unsigned {
                upload_preset: preset.clone(),
            },
            (None, Some(api_key), Some(api_secret)) => Credentials::Signed {
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            },
            _ => anyhow::bail!("Cloudinary needs an upload preset or an API key and secret"),
        };

        Ok(Self {
            client,
            upload_url: format!(
                "{}/v1_1/{}/image/upload",
                config.base_url.trim_end_matches('/'),
                cloud_name
            ),
            credentials,
            folder: config
                .folder
                .as_deref()
                .map(|f| f.trim_matches('/').to_string())
                .filter(|f| !f.is_empty()),
        })
    }

    fn full_public_id(&self, public_id: &str) -> String {
        match &self.folder {
            Some(folder) => format!("{}/{}", folder, public_id),
            None => public_id.to_string(),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::http("Street View image", e))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Failed to download image: {}", status);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::http("Street View image", e))?;
        Ok(bytes.to_vec())
    }

    fn upload_form(&self, bytes: Vec<u8>, public_id: &str) -> Form {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name("image.jpg"))
            .text("public_id", public_id.to_string());

        match &self.credentials {
            Credentials::Unsigned { upload_preset } => form.text("upload_preset", upload_preset.clone()),
            Credentials::Signed { api_key, api_secret } => {
                let timestamp = chrono::Utc::now().timestamp().to_string();
                let signature = sign(
                    &[("public_id", public_id), ("timestamp", timestamp.as_str())],
                    api_secret,
                );
                form.text("timestamp", timestamp)
                    .text("api_key", api_key.clone())
                    .text("signature", signature)
                    .text("signature_algorithm", "sha256")
            }
        }
    }
}

#[async_trait]
impl ImagePublisher for CloudinaryPublisher {
    async fn publish(&self, source: ImageSource, public_id: &str) -> Result<String> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::Url(url) => self.download(&url).await?,
        };

        let public_id = self.full_public_id(public_id);
        let form = self.upload_form(bytes, &public_id);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::http(SERVICE, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::http(SERVICE, e))?;
        let parsed: Option<UploadResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(ApiError::HttpStatus {
                service: SERVICE,
                status,
                body: message,
            }
            .into());
        }

        parsed
            .and_then(|p| p.secure_url)
            .with_context(|| format!("{} response has no secure_url", SERVICE))
    }
}
