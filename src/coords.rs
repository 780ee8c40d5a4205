// 🧭 Coordinate Normalizer - wrap longitudes, round to fixed precision
//
// Every coordinate is normalized BEFORE storage and BEFORE dedup comparison,
// so floating noise (40.0000000001 vs 40.0) cannot defeat deduplication.

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Decimal digits kept for lat/lon (≈0.11 m at the equator)
pub const COORDINATE_PRECISION: i32 = 6;

fn precision_scale() -> f64 {
    10f64.powi(COORDINATE_PRECISION)
}

// ============================================================================
// COORDINATE
// ============================================================================

/// A validated, normalized (lat, lon) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn same_place(&self, lat: f64, lon: f64) -> bool {
        self.lat == lat && self.lon == lon
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Wrap a longitude into [-180, 180], congruent to the input modulo 360.
///
/// Values already in range are returned untouched (both 180 and -180 are kept).
/// Large inputs are reduced with `rem_euclid` first so the add/subtract loop
/// runs at most once or twice.
pub fn normalize_longitude(lng: f64) -> Result<f64> {
    if !lng.is_finite() {
        return Err(EditorError::invalid(lng));
    }

    let mut lon = lng;
    if lon.abs() > 540.0 {
        lon = lon.rem_euclid(360.0);
    }
    while lon > 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }

    Ok(lon)
}

/// Round to `COORDINATE_PRECISION` decimals (half away from zero)
pub fn round_coordinate(value: f64) -> f64 {
    let scale = precision_scale();
    let scaled = value * scale;
    // Values this large carry no fractional digits; scaling would overflow to inf
    if !scaled.is_finite() {
        return value;
    }
    let rounded = scaled.round() / scale;
    // -0.0 and 0.0 must compare as the same place
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Validate and normalize a raw (lat, lon) pair.
///
/// Latitude is NOT wrapped or clamped, only rounded.
pub fn normalize(lat: f64, lon: f64) -> Result<Coordinate> {
    if !lat.is_finite() {
        return Err(EditorError::invalid(lat));
    }
    let lon = normalize_longitude(lon)?;

    Ok(Coordinate {
        lat: round_coordinate(lat),
        lon: round_coordinate(lon),
    })
}

/// Parse a user-entered coordinate field ("  40.5 ", "-105")
pub fn parse_coordinate(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let value: f64 = trimmed.parse().map_err(|_| EditorError::invalid(trimmed))?;
    if !value.is_finite() {
        return Err(EditorError::invalid(trimmed));
    }
    Ok(value)
}
