//! External collaborators: geocoding, panorama lookup, image publishing
//! and checkpoint storage.

mod error;
mod geocoder;
mod http;
mod publisher;
mod store;
mod streetview;

pub use error::ApiError;
pub use geocoder::GoogleGeocoder;
pub use http::build_http_client;
pub use publisher::CloudinaryPublisher;
pub use store::{open_location, parse_s3_uri};
pub use streetview::{ImageRequest, StreetViewLocator};

use crate::geo::LatLng;
use anyhow::Result;
use async_trait::async_trait;

/// The nearest street-level capture point to a location.
#[derive(Debug, Clone, PartialEq)]
pub struct Panorama {
    pub pano_id: String,
    /// Where the camera actually stood, not the queried point
    pub location: LatLng,
}

/// Where the publisher gets the image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Free-text address to coordinates. `Ok(None)` means the address is unknown.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<LatLng>>;
}

/// Coordinates to the nearest panorama. `Ok(None)` means no imagery nearby.
#[async_trait]
pub trait PanoramaLocator: Send + Sync {
    async fn locate(&self, target: LatLng) -> Result<Option<Panorama>>;
}

/// Publishes an image under a caller-chosen id and returns its public URL.
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    async fn publish(&self, source: ImageSource, public_id: &str) -> Result<String>;
}
