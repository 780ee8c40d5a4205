// 🌍 Geocode Enricher - fill blank point names from a reverse-geocoding lookup
//
// Fire-and-forget: the point exists immediately with an empty name, the lookup
// runs as a spawned task, and its result comes back over a channel. The task
// never touches the store. The session drains the channel on its own thread and
// applies each result only if the point is still alive.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::GeocodeConfig;
use crate::error::{EditorError, Result};
use crate::point::PointId;

// ============================================================================
// GEOCODER (external collaborator)
// ============================================================================

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Name for a coordinate, `None` when the provider has nothing
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Nominatim-style reverse endpoint: `GET ?format=jsonv2&lat=..&lon=..` -> `{"display_name": ..}`
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EditorError::GeocodeUnavailable(e.to_string()))?;

        Ok(NominatimGeocoder {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EditorError::GeocodeUnavailable(format!("request error: {e}")))?;

        if !response.status().is_success() {
            return Err(EditorError::GeocodeUnavailable(format!(
                "geocoder responded with {}",
                response.status()
            )));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| EditorError::GeocodeUnavailable(format!("bad response: {e}")))?;

        Ok(body.display_name.filter(|name| !name.is_empty()))
    }
}

// ============================================================================
// ENRICHER
// ============================================================================

/// A finished lookup waiting to be applied
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub point: PointId,
    pub name: Option<String>,
}

pub struct GeocodeEnricher {
    geocoder: Arc<dyn Geocoder>,
    runtime: Handle,
    pending: HashSet<PointId>,
    tx: UnboundedSender<Enrichment>,
    rx: UnboundedReceiver<Enrichment>,
}

impl GeocodeEnricher {
    pub fn new(geocoder: Arc<dyn Geocoder>, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        GeocodeEnricher {
            geocoder,
            runtime,
            pending: HashSet::new(),
            tx,
            rx,
        }
    }

    /// Enricher on the tokio runtime we are currently running in, if any
    pub fn on_current_runtime(geocoder: Arc<dyn Geocoder>) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|runtime| Self::new(geocoder, runtime))
    }

    /// Start a lookup for `point`. Returns false if one is already in flight.
    pub fn request(&mut self, point: PointId, lat: f64, lon: f64) -> bool {
        if !self.pending.insert(point) {
            return false;
        }

        let geocoder = self.geocoder.clone();
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let name = match geocoder.reverse(lat, lon).await {
                Ok(name) => name,
                Err(err) => {
                    warn!("Reverse geocoding ({}, {}) failed: {}", lat, lon, err);
                    None
                }
            };
            // Receiver gone means the session was dropped; nothing to do
            let _ = tx.send(Enrichment { point, name });
        });

        debug!("Geocode lookup started for {}", point);
        true
    }

    pub fn is_pending(&self, point: PointId) -> bool {
        self.pending.contains(&point)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// A finished lookup, without waiting
    pub fn try_next(&mut self) -> Option<Enrichment> {
        let enrichment = self.rx.try_recv().ok()?;
        self.pending.remove(&enrichment.point);
        Some(enrichment)
    }

    /// Wait for the next finished lookup; `None` right away when nothing is in flight
    pub async fn next(&mut self) -> Option<Enrichment> {
        if self.pending.is_empty() {
            return self.try_next();
        }
        let enrichment = self.rx.recv().await?;
        self.pending.remove(&enrichment.point);
        Some(enrichment)
    }
}
