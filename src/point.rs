// 📍 GeoPoint Entity - stable identity + mutable values
//
// "The point's coordinates are VALUES (can change), the PointId is IDENTITY (never changes)"
//
// Two points are the same point only if their ids match. For deduplication
// the store compares (lat, lon) structurally instead; the name is deliberately
// left out so two imports of the same coordinate collapse even if named differently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coords::Coordinate;

// ============================================================================
// POINT IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(uuid::Uuid);

impl PointId {
    pub fn new() -> Self {
        PointId(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(PointId)
    }
}

impl Default for PointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// GEO POINT
// ============================================================================

/// A named location on the map.
///
/// Only the store builds these, so `lat`/`lon` are always finite, rounded and
/// `lon` is in [-180, 180].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Stable identity - NEVER changes
    pub id: PointId,

    /// Display name, empty while waiting for reverse geocoding
    pub name: String,

    /// Degrees, not wrapped
    pub lat: f64,

    /// Degrees, always in [-180, 180]
    pub lon: f64,

    /// Mirrors whether the marker's detail view is open
    #[serde(default)]
    pub is_selected: bool,

    pub created_at: DateTime<Utc>,
}

impl GeoPoint {
    pub(crate) fn new(name: String, coordinate: Coordinate) -> Self {
        GeoPoint {
            id: PointId::new(),
            name,
            lat: coordinate.lat,
            lon: coordinate.lon,
            is_selected: false,
            created_at: Utc::now(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            lat: self.lat,
            lon: self.lon,
        }
    }

    /// Structural equality used for dedup: (lat, lon) only
    pub fn same_place(&self, other: &GeoPoint) -> bool {
        self.coordinate().same_place(other.lat, other.lon)
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub(crate) fn move_to(&mut self, coordinate: Coordinate) {
        self.lat = coordinate.lat;
        self.lon = coordinate.lon;
    }
}
