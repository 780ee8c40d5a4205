// Geo Point Editor - Core Library
// Exposes all modules for use in CLI, TUI, API server, and tests

pub mod config;
pub mod coords;
pub mod csv_codec;
pub mod error;
pub mod geocode;
pub mod marker;
pub mod point;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{EditorConfig, GeocodeConfig, MapView};
pub use coords::{normalize, normalize_longitude, parse_coordinate, round_coordinate, Coordinate};
pub use csv_codec::{deserialize, serialize, ImportBatch, MalformedRow, PointRow};
pub use error::{EditorError, Result};
pub use geocode::{Enrichment, GeocodeEnricher, Geocoder, NominatimGeocoder};
pub use marker::{
    BindingState, DetailForm, HeadlessSurface, MapSurface, MarkerBinding, MarkerHandle,
};
pub use point::{GeoPoint, PointId};
pub use session::{EditorSession, ImportSummary};
pub use store::{Direction, PointStore, SortDirections, SortKey, StoreEvent, SubscriptionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
