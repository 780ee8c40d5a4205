// ⚠️ Editor Errors - every failure in the core degrades to a no-op or a partial result
//
// Validation happens at the boundary where input enters (creation, edit commit,
// CSV row parse). Once a GeoPoint lives in the store it is assumed valid.

use thiserror::Error;

use crate::point::PointId;

#[derive(Debug, Error)]
pub enum EditorError {
    /// Latitude or longitude is NaN, infinite or not a number at all
    #[error("invalid coordinate: {value}")]
    InvalidCoordinate { value: String },

    /// A point already occupies this (rounded) coordinate
    #[error("duplicate point at ({lat}, {lon})")]
    DuplicatePoint { lat: f64, lon: f64 },

    /// CSV row that could not be turned into a point (import continues)
    #[error("malformed import row {line}: {reason}")]
    MalformedImportRow { line: u64, reason: String },

    /// Reverse-geocoding request failed or returned garbage
    #[error("geocode unavailable: {0}")]
    GeocodeUnavailable(String),

    #[error("unknown point {0}")]
    UnknownPoint(PointId),

    #[error("unknown marker {0}")]
    UnknownMarker(u64),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditorError {
    pub fn invalid(value: impl ToString) -> Self {
        EditorError::InvalidCoordinate {
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
