//! Geographic helpers for the Street View workflow.
//!
//! ## Conventions
//!
//! - Coordinates are WGS84 latitude/longitude in degrees.
//! - Bearings are compass headings in degrees clockwise from north, in `[0, 360)`.
//! - All trigonometry happens in radians; conversion is done at the boundaries.

use serde::{Deserialize, Serialize};

/// A WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite and within WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Initial great-circle bearing (forward azimuth) from `from` to `to`.
///
/// Identical points yield `0.0`: `atan2(0, 0)` is defined as zero, so the
/// result is never NaN for finite inputs.
pub fn bearing(from: LatLng, to: LatLng) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let heading = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    // -0.0 and rounding at exactly 360.0 both fold back to 0.0
    if heading >= 360.0 || heading == 0.0 {
        0.0
    } else {
        heading
    }
}

/// Normalize free text into an identifier safe for an image host.
///
/// Lower-cases, trims, turns whitespace into `_` and drops any punctuation
/// other than `_` and `-`. Normalizing an already-normalized string is a no-op.
pub fn normalize_identifier(text: &str) -> String {
    text.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_alphanumeric() || c == '_' || c == '-' {
                Some(c)
            } else {
                None
            }
        })
        .collect()
}
