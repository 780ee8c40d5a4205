// 🧩 Editor Session - one store, one marker layer, one enricher
//
// Every user event (map click, detail edit, drag, delete, file import) enters
// here and is routed through a single add path and a single update path, so
// normalization, dedup and marker sync apply the same way no matter where the
// input came from. All mutations happen through `&mut self`, one at a time.

use log::{debug, info};
use serde::Serialize;

use crate::config::EditorConfig;
use crate::csv_codec::{self, ImportBatch, MalformedRow};
use crate::error::{EditorError, Result};
use crate::geocode::{Enrichment, GeocodeEnricher};
use crate::marker::{DetailForm, MapSurface, MarkerBinding, MarkerHandle};
use crate::point::{GeoPoint, PointId};
use crate::store::{Direction, PointStore, SortKey, StoreEvent, SubscriptionId};

/// What happened to each row of an import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub malformed: Vec<MalformedRow>,
}

impl ImportSummary {
    pub fn skipped(&self) -> usize {
        self.duplicates + self.invalid + self.malformed.len()
    }
}

pub struct EditorSession<S: MapSurface> {
    store: PointStore,
    markers: MarkerBinding<S>,
    enricher: Option<GeocodeEnricher>,
}

impl<S: MapSurface> EditorSession<S> {
    pub fn new(surface: S, config: &EditorConfig) -> Self {
        EditorSession {
            store: PointStore::new(),
            markers: MarkerBinding::new(surface, config.highlight_radius_m),
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: GeocodeEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn markers(&self) -> &MarkerBinding<S> {
        &self.markers
    }

    pub fn surface(&self) -> &S {
        self.markers.surface()
    }

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        self.store.subscribe(observer)
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// The single add path: store, then marker, then (for blank names) a lookup
    pub fn create_point(&mut self, name: &str, lat: f64, lon: f64) -> Result<GeoPoint> {
        let point = self.store.add(name, lat, lon)?;
        self.markers.bind(&point);

        if !point.has_name() {
            if let Some(enricher) = self.enricher.as_mut() {
                enricher.request(point.id, point.lat, point.lon);
            }
        }

        Ok(point)
    }

    /// Double-click on the map: new unnamed point
    pub fn on_double_click(&mut self, lat: f64, lng: f64) -> Option<GeoPoint> {
        match self.create_point("", lat, lng) {
            Ok(point) => Some(point),
            Err(err) => {
                debug!("Double-click at ({}, {}) ignored: {}", lat, lng, err);
                None
            }
        }
    }

    /// Single click on the empty map closes any open detail view
    pub fn on_click(&mut self, _lat: f64, _lng: f64) {
        self.close_all_details();
    }

    // ------------------------------------------------------------------------
    // Detail view
    // ------------------------------------------------------------------------

    /// Open a marker's detail view; only one is open at a time
    pub fn open_detail(&mut self, handle: MarkerHandle) -> Result<()> {
        let id = self.point_for(handle)?;
        for other in self.selected_ids() {
            if other != id {
                self.markers.deselect(&mut self.store, other)?;
            }
        }
        self.markers.select(&mut self.store, id)
    }

    pub fn close_detail(&mut self, handle: MarkerHandle) -> Result<()> {
        let id = self.point_for(handle)?;
        self.markers.deselect(&mut self.store, id)
    }

    pub fn close_all_details(&mut self) {
        for id in self.selected_ids() {
            // Ids come straight from the store, so deselect cannot miss
            let _ = self.markers.deselect(&mut self.store, id);
        }
    }

    fn selected_ids(&self) -> Vec<PointId> {
        self.store
            .points()
            .iter()
            .filter(|p| p.is_selected)
            .map(|p| p.id)
            .collect()
    }

    fn point_for(&self, handle: MarkerHandle) -> Result<PointId> {
        self.markers
            .point_for(handle)
            .ok_or(EditorError::UnknownMarker(handle.0))
    }

    /// Confirm button / Enter in the detail form
    pub fn commit_edit(&mut self, handle: MarkerHandle, form: &DetailForm) -> Result<GeoPoint> {
        self.markers.commit_edit(&mut self.store, handle, form)
    }

    /// Edit addressed by point instead of marker (table row, HTTP PATCH)
    pub fn edit_point(&mut self, id: PointId, form: &DetailForm) -> Result<GeoPoint> {
        let handle = self
            .markers
            .marker_for(id)
            .ok_or(EditorError::UnknownPoint(id))?;
        self.commit_edit(handle, form)
    }

    pub fn on_drag(&mut self, handle: MarkerHandle, lat: f64, lon: f64) -> Result<GeoPoint> {
        self.markers.drag(&mut self.store, handle, lat, lon)
    }

    // ------------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------------

    /// Sever the marker first, then drop the point. Idempotent.
    pub fn delete_point(&mut self, id: PointId) -> Option<GeoPoint> {
        self.markers.unbind(id);
        self.store.remove(id)
    }

    /// Delete button in a marker's detail view
    pub fn delete_marker(&mut self, handle: MarkerHandle) -> Option<GeoPoint> {
        let id = self.markers.point_for(handle)?;
        self.delete_point(id)
    }

    /// Remove everything in the current filtered view.
    ///
    /// Repeatedly removes the first element of the live view. Each pass shrinks
    /// the store by one, so the loop is bounded by the starting size.
    pub fn remove_all_filtered(&mut self) -> usize {
        let limit = self.store.len();
        let mut removed = 0;

        for _ in 0..limit {
            let Some(first) = self.store.first_filtered().map(|p| p.id) else {
                break;
            };
            if self.delete_point(first).is_some() {
                removed += 1;
            }
        }

        info!("Removed {} filtered points", removed);
        removed
    }

    // ------------------------------------------------------------------------
    // Table view
    // ------------------------------------------------------------------------

    pub fn set_filter(&mut self, pattern: &str) {
        self.store.set_filter(pattern);
    }

    pub fn filtered(&self) -> Vec<GeoPoint> {
        self.store.filtered()
    }

    pub fn sort(&mut self, key: SortKey) -> Direction {
        self.store.sort(key)
    }

    // ------------------------------------------------------------------------
    // Import / export
    // ------------------------------------------------------------------------

    /// Parse CSV text and add each row, in order, through `create_point`
    pub fn import_csv(&mut self, text: &str) -> Result<ImportSummary> {
        let batch = csv_codec::deserialize(text)?;
        Ok(self.import_batch(batch))
    }

    /// Add already-parsed rows, in order, through `create_point`
    pub fn import_batch(&mut self, batch: ImportBatch) -> ImportSummary {
        let mut summary = ImportSummary {
            malformed: batch.malformed,
            ..ImportSummary::default()
        };

        for row in batch.rows {
            match self.create_point(&row.name, row.lat, row.lon) {
                Ok(_) => summary.added += 1,
                Err(EditorError::DuplicatePoint { .. }) => summary.duplicates += 1,
                Err(_) => summary.invalid += 1,
            }
        }

        info!(
            "Imported {} points ({} duplicates, {} invalid, {} malformed rows)",
            summary.added,
            summary.duplicates,
            summary.invalid,
            summary.malformed.len()
        );
        summary
    }

    pub fn export_csv(&self) -> Result<String> {
        csv_codec::serialize(self.store.points())
    }

    // ------------------------------------------------------------------------
    // Enrichment
    // ------------------------------------------------------------------------

    /// Apply one finished lookup.
    ///
    /// No-op when the point is gone, when the lookup found nothing, or when the
    /// point got a name in the meantime. Returns true if a name was written.
    pub fn apply_enrichment(&mut self, enrichment: Enrichment) -> bool {
        let Some(name) = enrichment.name else {
            return false;
        };
        let Some(point) = self.store.get(enrichment.point) else {
            debug!("Lookup result for removed point {} dropped", enrichment.point);
            return false;
        };
        if point.has_name() {
            return false;
        }

        if self.store.set_name(enrichment.point, &name).is_err() {
            return false;
        }
        if let Some(point) = self.store.get(enrichment.point) {
            self.markers.refresh_name(point);
        }
        true
    }

    /// Apply every lookup that has already finished
    pub fn poll_enrichments(&mut self) -> usize {
        let mut applied = 0;
        while let Some(enrichment) = self.enricher.as_mut().and_then(|e| e.try_next()) {
            if self.apply_enrichment(enrichment) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next lookup and apply it; false when nothing was in flight
    pub async fn next_enrichment(&mut self) -> bool {
        let Some(enricher) = self.enricher.as_mut() else {
            return false;
        };
        let finished = enricher.next().await;
        match finished {
            Some(enrichment) => {
                self.apply_enrichment(enrichment);
                true
            }
            None => false,
        }
    }

    pub fn pending_lookups(&self) -> usize {
        self.enricher.as_ref().map_or(0, |e| e.pending_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::tests::FixedGeocoder;
    use crate::marker::{BindingState, HeadlessSurface};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn session() -> EditorSession<HeadlessSurface> {
        EditorSession::new(HeadlessSurface::new(), &EditorConfig::default())
    }

    fn enriched(geocoder: Arc<FixedGeocoder>) -> EditorSession<HeadlessSurface> {
        let enricher = GeocodeEnricher::on_current_runtime(geocoder).unwrap();
        session().with_enricher(enricher)
    }

    #[test]
    fn test_double_click_creates_bound_point() {
        let mut session = session();
        let point = session.on_double_click(91.5, 370.2).unwrap();

        assert_eq!(point.lat, 91.5);
        assert_eq!(point.lon, 10.2);
        assert_eq!(point.name, "");
        assert_eq!(session.markers().state(point.id), BindingState::Bound);
        assert_eq!(session.surface().marker_count(), 1);
    }

    #[test]
    fn test_duplicate_creation_keeps_first() {
        let mut session = session();
        session.create_point("First", 40.0, -105.0).unwrap();

        assert!(session.create_point("Second", 40.0, -105.0).is_err());
        assert_eq!(session.store().len(), 1);
        assert_eq!(session.store().points()[0].name, "First");
        assert_eq!(session.surface().marker_count(), 1);
    }

    #[test]
    fn test_invalid_click_is_ignored() {
        let mut session = session();
        assert!(session.on_double_click(f64::NAN, 1.0).is_none());
        assert!(session.store().is_empty());
        assert_eq!(session.surface().marker_count(), 0);
    }

    #[test]
    fn test_only_one_detail_open() {
        let mut session = session();
        let a = session.create_point("A", 1.0, 1.0).unwrap();
        let b = session.create_point("B", 2.0, 2.0).unwrap();
        let ha = session.markers().marker_for(a.id).unwrap();
        let hb = session.markers().marker_for(b.id).unwrap();

        session.open_detail(ha).unwrap();
        session.open_detail(hb).unwrap();

        assert_eq!(session.markers().state(a.id), BindingState::Bound);
        assert_eq!(session.markers().state(b.id), BindingState::Selected);
        assert_eq!(session.surface().highlight_count(), 1);

        session.on_click(0.0, 0.0);
        assert_eq!(session.markers().state(b.id), BindingState::Bound);
        assert_eq!(session.surface().open_detail_count(), 0);
    }

    #[test]
    fn test_remove_all_filtered_leaves_rest() {
        let mut session = session();
        session.create_point("Denver", 39.74, -104.99).unwrap();
        session.create_point("Boulder", 40.01, -105.27).unwrap();
        session.create_point("Denver Airport", 39.86, -104.67).unwrap();
        session.create_point("Golden", 39.76, -105.22).unwrap();
        session.create_point("Denver Zoo", 39.75, -104.95).unwrap();
        let first = session.store().points()[0].id;
        session.open_detail(session.markers().marker_for(first).unwrap()).unwrap();

        session.set_filter("denver");
        assert_eq!(session.filtered().len(), 3);

        assert_eq!(session.remove_all_filtered(), 3);
        assert_eq!(session.store().len(), 2);
        assert!(session.filtered().is_empty());
        assert_eq!(session.surface().marker_count(), 2);
        assert_eq!(session.surface().highlight_count(), 0);
        assert_eq!(session.markers().len(), 2);
    }

    #[test]
    fn test_remove_all_filtered_on_empty_store() {
        let mut session = session();
        assert_eq!(session.remove_all_filtered(), 0);
    }

    #[test]
    fn test_delete_marker_is_idempotent() {
        let mut session = session();
        let point = session.create_point("A", 1.0, 1.0).unwrap();
        let handle = session.markers().marker_for(point.id).unwrap();

        assert!(session.delete_marker(handle).is_some());
        assert!(session.delete_marker(handle).is_none());
        assert!(session.delete_point(point.id).is_none());
        assert_eq!(session.surface().marker_count(), 0);
    }

    #[test]
    fn test_edit_with_bad_latitude_changes_nothing() {
        let mut session = session();
        let point = session.create_point("Denver", 39.73, -104.99).unwrap();
        let handle = session.markers().marker_for(point.id).unwrap();

        let form = DetailForm {
            name: "Renamed".to_string(),
            lat: "abc".to_string(),
            lon: "-100".to_string(),
        };
        assert!(session.commit_edit(handle, &form).is_err());

        let stored = session.store().get(point.id).unwrap();
        assert_eq!((stored.name.as_str(), stored.lat, stored.lon), ("Denver", 39.73, -104.99));
        assert_eq!(session.surface().marker_position(handle), Some((39.73, -104.99)));
    }

    #[test]
    fn test_edit_point_by_id() {
        let mut session = session();
        let point = session.create_point("Denver", 39.73, -104.99).unwrap();

        let form = DetailForm {
            name: "Home".to_string(),
            lat: "39.5".to_string(),
            lon: "-105".to_string(),
        };
        let updated = session.edit_point(point.id, &form).unwrap();
        assert_eq!(updated.name, "Home");
        assert!(session.edit_point(PointId::new(), &form).is_err());
    }

    #[test]
    fn test_import_goes_through_add_path() {
        let mut session = session();
        session.create_point("Existing", 40.0, -105.0).unwrap();

        let text = "name,lat,lon\nDup,40.0,-105.0\nWrapped,10,370.2\nBad,abc,1\n\
                    Also,1,2\nWrappedAgain,10,10.2\n";
        let summary = session.import_csv(text).unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(summary.malformed.len(), 1);
        assert_eq!(summary.skipped(), 3);

        let names: Vec<_> = session.store().points().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["Existing", "Wrapped", "Also"]);
        assert_eq!(session.store().points()[1].lon, 10.2);
        assert_eq!(session.surface().marker_count(), 3);
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut session = session();
        session.create_point("Denver", 39.7392, -104.9903).unwrap();
        session.create_point("Sydney", -33.8688, 151.2093).unwrap();
        session.create_point("", 51.5, -0.12).unwrap();

        let exported = session.export_csv().unwrap();

        let mut other = self::session();
        other.import_csv(&exported).unwrap();
        assert_eq!(other.export_csv().unwrap(), exported);
    }

    #[tokio::test]
    async fn test_enrichment_fills_blank_name() {
        let geocoder = FixedGeocoder::named("Union Station");
        let mut session = enriched(geocoder.clone());

        let point = session.on_double_click(39.75, -105.0).unwrap();
        assert_eq!(session.pending_lookups(), 1);
        let handle = session.markers().marker_for(point.id).unwrap();
        session.open_detail(handle).unwrap();

        assert!(session.next_enrichment().await);
        assert_eq!(session.store().get(point.id).unwrap().name, "Union Station");
        assert_eq!(session.surface().detail(handle).unwrap().name, "Union Station");
    }

    #[tokio::test]
    async fn test_named_or_duplicate_points_skip_lookup() {
        let geocoder = FixedGeocoder::named("X");
        let mut session = enriched(geocoder.clone());

        session.create_point("Named", 1.0, 1.0).unwrap();
        session.on_double_click(2.0, 2.0).unwrap();
        assert!(session.on_double_click(2.0, 2.0).is_none());

        while session.next_enrichment().await {}
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enrichment_for_removed_point_is_noop() {
        let mut session = enriched(FixedGeocoder::named("Ghost"));

        let point = session.on_double_click(5.0, 5.0).unwrap();
        session.delete_point(point.id);

        assert!(session.next_enrichment().await);
        assert!(session.store().is_empty());
        assert_eq!(session.surface().marker_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_name_empty() {
        let mut session = enriched(FixedGeocoder::failing());

        let point = session.on_double_click(5.0, 5.0).unwrap();
        session.next_enrichment().await;

        assert_eq!(session.store().get(point.id).unwrap().name, "");
    }

    #[tokio::test]
    async fn test_user_name_wins_over_late_lookup() {
        let mut session = enriched(FixedGeocoder::named("Geocoded"));

        let point = session.on_double_click(5.0, 5.0).unwrap();
        let handle = session.markers().marker_for(point.id).unwrap();
        let form = DetailForm {
            name: "Mine".to_string(),
            lat: "5".to_string(),
            lon: "5".to_string(),
        };
        session.commit_edit(handle, &form).unwrap();
        session.next_enrichment().await;

        assert_eq!(session.store().get(point.id).unwrap().name, "Mine");
    }

    #[test]
    fn test_apply_enrichment_directly() {
        let mut session = session();
        let point = session.create_point("", 1.0, 1.0).unwrap();

        assert!(!session.apply_enrichment(Enrichment {
            point: point.id,
            name: None
        }));
        assert!(session.apply_enrichment(Enrichment {
            point: point.id,
            name: Some("Found".to_string())
        }));
        assert!(!session.apply_enrichment(Enrichment {
            point: PointId::new(),
            name: Some("Nobody".to_string())
        }));
        assert_eq!(session.store().get(point.id).unwrap().name, "Found");
    }

    #[test]
    fn test_observer_sees_session_changes() {
        let mut session = session();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let p = session.create_point("A", 1.0, 1.0).unwrap();
        session.sort(SortKey::Lat);
        session.delete_point(p.id);

        assert_eq!(events.lock().unwrap().len(), 3);
    }
}
