// 🗺️ Marker Binding - one visual marker per live GeoPoint, kept in sync both ways
//
// The point is the source of truth. The marker is its visual shadow, except for
// position feedback: a drag on the map flows back into the point through the
// SAME update path as a form edit (same validation, same renormalization).
//
// Per-point state machine:
//
//   Unbound --bind--> Bound --select--> Selected
//      ^                |  <--deselect--    |
//      +----unbind------+-------------------+
//
// The link is a bidirectional index (PointId <-> MarkerHandle). The marker only
// knows the point by id and never owns its lifecycle.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::coords;
use crate::error::{EditorError, Result};
use crate::point::{GeoPoint, PointId};
use crate::store::PointStore;

// ============================================================================
// MAP SURFACE (external collaborator)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerHandle(pub u64);

impl fmt::Display for MarkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HighlightHandle(pub u64);

/// The three editable fields of a marker's detail view, as typed by the user
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailForm {
    pub name: String,
    pub lat: String,
    pub lon: String,
}

impl DetailForm {
    pub fn from_point(point: &GeoPoint) -> Self {
        DetailForm {
            name: point.name.clone(),
            lat: point.lat.to_string(),
            lon: point.lon.to_string(),
        }
    }
}

/// Commands the core issues to whatever draws the map
pub trait MapSurface {
    fn add_marker(&mut self, lat: f64, lon: f64) -> MarkerHandle;
    fn remove_marker(&mut self, handle: MarkerHandle);
    fn move_marker(&mut self, handle: MarkerHandle, lat: f64, lon: f64);

    fn open_detail(&mut self, handle: MarkerHandle, form: &DetailForm);
    fn update_detail(&mut self, handle: MarkerHandle, form: &DetailForm);
    fn close_detail(&mut self, handle: MarkerHandle);

    /// Circular overlay with a fixed real-world radius (independent of zoom)
    fn add_highlight(&mut self, lat: f64, lon: f64, radius_m: f64) -> HighlightHandle;
    fn remove_highlight(&mut self, handle: HighlightHandle);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highlight {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

/// In-memory map surface: remembers markers, open detail views and highlights.
///
/// Backs the terminal UI and the HTTP server, where nothing is drawn on a real map.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    markers: BTreeMap<MarkerHandle, (f64, f64)>,
    details: BTreeMap<MarkerHandle, DetailForm>,
    highlights: BTreeMap<HighlightHandle, Highlight>,
    next_handle: u64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn marker_position(&self, handle: MarkerHandle) -> Option<(f64, f64)> {
        self.markers.get(&handle).copied()
    }

    pub fn detail(&self, handle: MarkerHandle) -> Option<&DetailForm> {
        self.details.get(&handle)
    }

    pub fn open_detail_count(&self) -> usize {
        self.details.len()
    }

    pub fn highlights(&self) -> impl Iterator<Item = &Highlight> {
        self.highlights.values()
    }

    pub fn highlight_count(&self) -> usize {
        self.highlights.len()
    }
}

impl MapSurface for HeadlessSurface {
    fn add_marker(&mut self, lat: f64, lon: f64) -> MarkerHandle {
        let handle = MarkerHandle(self.next());
        self.markers.insert(handle, (lat, lon));
        handle
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        self.markers.remove(&handle);
        self.details.remove(&handle);
    }

    fn move_marker(&mut self, handle: MarkerHandle, lat: f64, lon: f64) {
        if let Some(position) = self.markers.get_mut(&handle) {
            *position = (lat, lon);
        }
    }

    fn open_detail(&mut self, handle: MarkerHandle, form: &DetailForm) {
        self.details.insert(handle, form.clone());
    }

    fn update_detail(&mut self, handle: MarkerHandle, form: &DetailForm) {
        if let Some(open) = self.details.get_mut(&handle) {
            *open = form.clone();
        }
    }

    fn close_detail(&mut self, handle: MarkerHandle) {
        self.details.remove(&handle);
    }

    fn add_highlight(&mut self, lat: f64, lon: f64, radius_m: f64) -> HighlightHandle {
        let handle = HighlightHandle(self.next());
        self.highlights.insert(handle, Highlight { lat, lon, radius_m });
        handle
    }

    fn remove_highlight(&mut self, handle: HighlightHandle) {
        self.highlights.remove(&handle);
    }
}

// ============================================================================
// BINDING STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    Unbound,
    Bound,
    Selected,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    marker: MarkerHandle,
    /// Present only while Selected
    highlight: Option<HighlightHandle>,
}

// ============================================================================
// MARKER BINDING
// ============================================================================

pub struct MarkerBinding<S: MapSurface> {
    surface: S,
    by_point: HashMap<PointId, Binding>,
    by_marker: HashMap<MarkerHandle, PointId>,
    highlight_radius_m: f64,
}

impl<S: MapSurface> MarkerBinding<S> {
    pub fn new(surface: S, highlight_radius_m: f64) -> Self {
        MarkerBinding {
            surface,
            by_point: HashMap::new(),
            by_marker: HashMap::new(),
            highlight_radius_m,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn marker_for(&self, id: PointId) -> Option<MarkerHandle> {
        self.by_point.get(&id).map(|b| b.marker)
    }

    pub fn point_for(&self, handle: MarkerHandle) -> Option<PointId> {
        self.by_marker.get(&handle).copied()
    }

    pub fn state(&self, id: PointId) -> BindingState {
        match self.by_point.get(&id) {
            None => BindingState::Unbound,
            Some(Binding { highlight: None, .. }) => BindingState::Bound,
            Some(Binding { highlight: Some(_), .. }) => BindingState::Selected,
        }
    }

    pub fn len(&self) -> usize {
        self.by_point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_point.is_empty()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Unbound -> Bound: put a marker on the map at the point's position
    pub fn bind(&mut self, point: &GeoPoint) -> MarkerHandle {
        if let Some(existing) = self.marker_for(point.id) {
            return existing;
        }

        let marker = self.surface.add_marker(point.lat, point.lon);
        self.by_point.insert(
            point.id,
            Binding {
                marker,
                highlight: None,
            },
        );
        self.by_marker.insert(marker, point.id);
        debug!("Bound point {} to {}", point.id, marker);
        marker
    }

    /// Any state -> Unbound: drop highlight, detail view and marker, sever both links.
    ///
    /// Must run before the point leaves the store.
    pub fn unbind(&mut self, id: PointId) -> Option<MarkerHandle> {
        let binding = self.by_point.remove(&id)?;
        self.by_marker.remove(&binding.marker);

        if let Some(highlight) = binding.highlight {
            self.surface.remove_highlight(highlight);
            self.surface.close_detail(binding.marker);
        }
        self.surface.remove_marker(binding.marker);
        debug!("Unbound point {} from {}", id, binding.marker);
        Some(binding.marker)
    }

    /// Bound -> Selected: open the detail view, draw the highlight, flag the point
    pub fn select(&mut self, store: &mut PointStore, id: PointId) -> Result<()> {
        let point = store.get(id).cloned().ok_or(EditorError::UnknownPoint(id))?;
        let binding = self
            .by_point
            .get_mut(&id)
            .ok_or(EditorError::UnknownPoint(id))?;

        if binding.highlight.is_some() {
            return Ok(());
        }

        self.surface
            .open_detail(binding.marker, &DetailForm::from_point(&point));
        binding.highlight = Some(self.surface.add_highlight(
            point.lat,
            point.lon,
            self.highlight_radius_m,
        ));
        store.set_selected(id, true)
    }

    /// Selected -> Bound: close the detail view, remove the highlight, clear the flag
    pub fn deselect(&mut self, store: &mut PointStore, id: PointId) -> Result<()> {
        let binding = self
            .by_point
            .get_mut(&id)
            .ok_or(EditorError::UnknownPoint(id))?;

        let Some(highlight) = binding.highlight.take() else {
            return Ok(());
        };
        self.surface.remove_highlight(highlight);
        self.surface.close_detail(binding.marker);

        // The point may already be gone if the caller is tearing things down
        if store.contains(id) {
            store.set_selected(id, false)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Edit protocol
    // ------------------------------------------------------------------------

    /// Commit the detail form of a marker.
    ///
    /// Both coordinates must parse as finite numbers, otherwise the whole edit is
    /// discarded (the name is not applied either). On success the point and the
    /// marker move together.
    pub fn commit_edit(
        &mut self,
        store: &mut PointStore,
        handle: MarkerHandle,
        form: &DetailForm,
    ) -> Result<GeoPoint> {
        let lat = coords::parse_coordinate(&form.lat)?;
        let lon = coords::parse_coordinate(&form.lon)?;

        self.update_position(store, handle, Some(&form.name), lat, lon)
    }

    /// Marker dragged on the map: same path as a form commit, without a name change.
    ///
    /// A rejected drag snaps the marker back to where the point still is.
    pub fn drag(
        &mut self,
        store: &mut PointStore,
        handle: MarkerHandle,
        lat: f64,
        lon: f64,
    ) -> Result<GeoPoint> {
        match self.update_position(store, handle, None, lat, lon) {
            Ok(point) => Ok(point),
            Err(err) => {
                if let Some(point) = self.point_for(handle).and_then(|id| store.get(id)) {
                    warn!("Drag of {} rejected ({}), snapping back", handle, err);
                    self.surface.move_marker(handle, point.lat, point.lon);
                }
                Err(err)
            }
        }
    }

    /// The one write path for positions coming from the map side.
    ///
    /// The store update is all-or-nothing; only after it succeeds does the marker move.
    pub fn update_position(
        &mut self,
        store: &mut PointStore,
        handle: MarkerHandle,
        name: Option<&str>,
        lat: f64,
        lon: f64,
    ) -> Result<GeoPoint> {
        let id = self
            .point_for(handle)
            .ok_or(EditorError::UnknownMarker(handle.0))?;

        let updated = match name {
            Some(name) => store.update(id, name, lat, lon)?,
            None => {
                store.set_position(id, lat, lon)?;
                store.get(id).cloned().ok_or(EditorError::UnknownPoint(id))?
            }
        };

        self.sync_marker(&updated);
        Ok(updated)
    }

    /// Mirror a point's current values onto its marker (position, highlight, open form)
    fn sync_marker(&mut self, point: &GeoPoint) {
        let Some(binding) = self.by_point.get_mut(&point.id) else {
            return;
        };

        self.surface.move_marker(binding.marker, point.lat, point.lon);

        if let Some(old) = binding.highlight.take() {
            self.surface.remove_highlight(old);
            binding.highlight = Some(self.surface.add_highlight(
                point.lat,
                point.lon,
                self.highlight_radius_m,
            ));
            self.surface
                .update_detail(binding.marker, &DetailForm::from_point(point));
        }
    }

    /// Push an externally changed name (geocoding) into the open detail view
    pub fn refresh_name(&mut self, point: &GeoPoint) {
        if self.state(point.id) != BindingState::Selected {
            return;
        }
        if let Some(marker) = self.marker_for(point.id) {
            self.surface
                .update_detail(marker, &DetailForm::from_point(point));
        }
    }
}
