// ⚙️ Editor Configuration - JSON file + environment overrides
//
// Missing file means defaults. Environment variables win over the file:
//   GEOPOINT_GEOCODE_URL  reverse-geocoding endpoint
//   GEOPOINT_BIND         server bind address
//   GEOPOINT_ENRICH       "0"/"false" disables name lookups

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_GEOCODE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapView {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

impl Default for MapView {
    fn default() -> Self {
        // Denver
        MapView {
            center_lat: 39.73,
            center_lon: -104.99,
            zoom: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        GeocodeConfig {
            enabled: true,
            endpoint: DEFAULT_GEOCODE_URL.to_string(),
            user_agent: format!("geopoint-editor/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub map: MapView,

    /// Radius of the selection highlight, in meters on the ground
    pub highlight_radius_m: f64,

    pub geocode: GeocodeConfig,

    /// Suggested file name for exports
    pub export_filename: String,

    /// HTTP server bind address
    pub bind: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        EditorConfig {
            map: MapView::default(),
            highlight_radius_m: 50.0,
            geocode: GeocodeConfig::default(),
            export_filename: "points.csv".to_string(),
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl EditorConfig {
    /// Load from a JSON file (defaults if it does not exist), then apply env overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: EditorConfig = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            EditorConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GEOPOINT_GEOCODE_URL") {
            self.geocode.endpoint = url;
        }
        if let Some(bind) = lookup("GEOPOINT_BIND") {
            self.bind = bind;
        }
        if let Some(flag) = lookup("GEOPOINT_ENRICH") {
            self.geocode.enabled = !matches!(
                flag.trim().to_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.map.zoom, 10);
        assert_eq!(config.highlight_radius_m, 50.0);
        assert!(config.geocode.enabled);
        assert_eq!(config.geocode.endpoint, DEFAULT_GEOCODE_URL);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EditorConfig =
            serde_json::from_str(r#"{"highlight_radius_m": 120.0, "geocode": {"enabled": false}}"#)
                .unwrap();

        assert_eq!(config.highlight_radius_m, 120.0);
        assert!(!config.geocode.enabled);
        assert_eq!(config.geocode.endpoint, DEFAULT_GEOCODE_URL);
        assert_eq!(config.export_filename, "points.csv");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GEOPOINT_GEOCODE_URL", "http://localhost:8080/reverse"),
            ("GEOPOINT_ENRICH", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = EditorConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.geocode.endpoint, "http://localhost:8080/reverse");
        assert!(!config.geocode.enabled);
        assert_eq!(config.bind, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = EditorConfig::load(Path::new("/nonexistent/geopoint.json")).unwrap();
        assert_eq!(config.map, MapView::default());
    }
}
