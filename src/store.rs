// 🗂️ Point Store - ordered, observable collection of GeoPoints
//
// Insertion order is the default order. The store is the Subject side of the
// change stream: every mutation emits a StoreEvent to all registered observers
// (table view, marker layer, HTTP clients) so nobody has to poll.
//
// Invariant: no two points share the same rounded (lat, lon).

use log::debug;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::coords::{self, Coordinate};
use crate::error::{EditorError, Result};
use crate::point::{GeoPoint, PointId};

// ============================================================================
// SORTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Lat,
    Lon,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "name" | "place" => Some(SortKey::Name),
            "lat" | "latitude" => Some(SortKey::Lat),
            "lon" | "lng" | "longitude" => Some(SortKey::Lon),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Lat => "lat",
            SortKey::Lon => "lon",
        }
    }

    fn compare(&self, a: &GeoPoint, b: &GeoPoint) -> Ordering {
        match self {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Lat => a.lat.total_cmp(&b.lat),
            SortKey::Lon => a.lon.total_cmp(&b.lon),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn toggled(&self) -> Self {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Ascending => "▲",
            Direction::Descending => "▼",
        }
    }
}

/// Last direction used for each sort key.
///
/// Each key toggles independently: sorting by lat twice flips lat only,
/// a later sort by name starts from name's own history.
#[derive(Debug, Clone, Default)]
pub struct SortDirections {
    last: HashMap<SortKey, Direction>,
}

impl SortDirections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direction for the next sort on `key` (ascending first), recorded as the new last
    pub fn advance(&mut self, key: SortKey) -> Direction {
        let next = match self.last.get(&key) {
            Some(direction) => direction.toggled(),
            None => Direction::Ascending,
        };
        self.last.insert(key, next);
        next
    }

    pub fn last(&self, key: SortKey) -> Option<Direction> {
        self.last.get(&key).copied()
    }
}

// ============================================================================
// FILTERING
// ============================================================================

/// Compiled name filter.
///
/// Patterns are case-insensitive regexes matched anywhere in the name, so a
/// plain word behaves as a substring search. A pattern that does not compile
/// (a user typing `(` halfway through) falls back to a literal substring match.
/// The empty pattern matches everything.
#[derive(Debug, Clone)]
pub enum NameFilter {
    All,
    Regex(Regex),
    Substring(String),
}

impl NameFilter {
    pub fn new(pattern: &str) -> Self {
        if pattern.is_empty() {
            return NameFilter::All;
        }
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => NameFilter::Regex(regex),
            Err(err) => {
                debug!("Filter {:?} is not a valid regex ({}), matching as text", pattern, err);
                NameFilter::Substring(pattern.to_lowercase())
            }
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::Regex(regex) => regex.is_match(name),
            NameFilter::Substring(text) => name.to_lowercase().contains(text.as_str()),
        }
    }
}

// ============================================================================
// CHANGE EVENTS (Subject / Observer)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    Added { id: PointId },
    Removed { id: PointId },
    Updated { id: PointId },
    Reordered { key: SortKey, direction: Direction },
    FilterChanged { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&StoreEvent) + Send>;

// ============================================================================
// POINT STORE
// ============================================================================

pub struct PointStore {
    points: Vec<GeoPoint>,
    pattern: String,
    name_filter: NameFilter,
    directions: SortDirections,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl Default for PointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PointStore {
    pub fn new() -> Self {
        PointStore {
            points: Vec::new(),
            pattern: String::new(),
            name_filter: NameFilter::All,
            directions: SortDirections::new(),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Register a view that wants every change event
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    fn emit(&mut self, event: StoreEvent) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&event);
        }
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Normalize, dedup and append a new point.
    ///
    /// Rejections (non-finite coordinate, duplicate place) leave the store untouched.
    pub fn add(&mut self, name: &str, lat: f64, lon: f64) -> Result<GeoPoint> {
        let coordinate = coords::normalize(lat, lon)?;

        if self.exists_at(&coordinate) {
            debug!("Duplicate point at ({}, {}) ignored", coordinate.lat, coordinate.lon);
            return Err(EditorError::DuplicatePoint {
                lat: coordinate.lat,
                lon: coordinate.lon,
            });
        }

        let point = GeoPoint::new(name.to_string(), coordinate);
        debug!("Added point {} at ({}, {})", point.id, point.lat, point.lon);
        self.points.push(point.clone());
        self.emit(StoreEvent::Added { id: point.id });

        Ok(point)
    }

    /// `add` for callers that only care whether a point was created
    pub fn try_add(&mut self, name: &str, lat: f64, lon: f64) -> Option<GeoPoint> {
        self.add(name, lat, lon).ok()
    }

    /// Remove by identity. Removing an absent point is a no-op.
    pub fn remove(&mut self, id: PointId) -> Option<GeoPoint> {
        let index = self.points.iter().position(|p| p.id == id)?;
        let removed = self.points.remove(index);
        debug!("Removed point {}", id);
        self.emit(StoreEvent::Removed { id });
        Some(removed)
    }

    /// Sort by `key`, toggling that key's own direction
    pub fn sort(&mut self, key: SortKey) -> Direction {
        let direction = self.directions.advance(key);

        self.points.sort_by(|a, b| {
            let ordering = key.compare(a, b);
            match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });

        self.emit(StoreEvent::Reordered { key, direction });
        direction
    }

    pub fn sort_directions(&self) -> &SortDirections {
        &self.directions
    }

    pub fn set_name(&mut self, id: PointId, name: &str) -> Result<()> {
        let point = self.get_mut(id)?;
        point.name = name.to_string();
        self.emit(StoreEvent::Updated { id });
        Ok(())
    }

    /// Move a point, keeping the normalization and dedup invariants.
    ///
    /// Moving onto a place occupied by ANOTHER point is rejected; moving onto
    /// its own place is fine.
    pub fn set_position(&mut self, id: PointId, lat: f64, lon: f64) -> Result<Coordinate> {
        let coordinate = coords::normalize(lat, lon)?;
        self.check_free(id, &coordinate)?;

        let point = self.get_mut(id)?;
        point.move_to(coordinate);
        self.emit(StoreEvent::Updated { id });
        Ok(coordinate)
    }

    /// Name and position in one step: either both change or neither does
    pub fn update(&mut self, id: PointId, name: &str, lat: f64, lon: f64) -> Result<GeoPoint> {
        let coordinate = coords::normalize(lat, lon)?;
        self.check_free(id, &coordinate)?;

        let point = self.get_mut(id)?;
        point.name = name.to_string();
        point.move_to(coordinate);
        let updated = point.clone();
        self.emit(StoreEvent::Updated { id });
        Ok(updated)
    }

    pub fn set_selected(&mut self, id: PointId, selected: bool) -> Result<()> {
        let point = self.get_mut(id)?;
        if point.is_selected != selected {
            point.is_selected = selected;
            self.emit(StoreEvent::Updated { id });
        }
        Ok(())
    }

    fn check_free(&self, id: PointId, coordinate: &Coordinate) -> Result<()> {
        let occupied = self
            .points
            .iter()
            .any(|p| p.id != id && coordinate.same_place(p.lat, p.lon));
        if occupied {
            return Err(EditorError::DuplicatePoint {
                lat: coordinate.lat,
                lon: coordinate.lon,
            });
        }
        Ok(())
    }

    fn get_mut(&mut self, id: PointId) -> Result<&mut GeoPoint> {
        self.points
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(EditorError::UnknownPoint(id))
    }

    // ------------------------------------------------------------------------
    // Filtering (live view)
    // ------------------------------------------------------------------------

    /// One-off filter, independent of the store's current pattern
    pub fn filter(&self, pattern: &str) -> Vec<GeoPoint> {
        self.matching(&NameFilter::new(pattern))
    }

    fn matching(&self, filter: &NameFilter) -> Vec<GeoPoint> {
        self.points
            .iter()
            .filter(|p| filter.matches(&p.name))
            .cloned()
            .collect()
    }

    pub fn set_filter(&mut self, pattern: &str) {
        if self.pattern != pattern {
            self.pattern = pattern.to_string();
            self.name_filter = NameFilter::new(pattern);
            self.emit(StoreEvent::FilterChanged {
                pattern: self.pattern.clone(),
            });
        }
    }

    pub fn filter_pattern(&self) -> &str {
        &self.pattern
    }

    /// The live view: current contents through the current pattern
    pub fn filtered(&self) -> Vec<GeoPoint> {
        self.matching(&self.name_filter)
    }

    /// First point of the live view, if any
    pub fn first_filtered(&self) -> Option<&GeoPoint> {
        self.points
            .iter()
            .find(|p| self.name_filter.matches(&p.name))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Structural dedup check on (lat, lon) of a candidate point
    pub fn exists(&self, candidate: &GeoPoint) -> bool {
        self.exists_at(&candidate.coordinate())
    }

    /// Structural dedup check for an already-normalized coordinate
    pub fn exists_at(&self, coordinate: &Coordinate) -> bool {
        self.points
            .iter()
            .any(|p| coordinate.same_place(p.lat, p.lon))
    }

    pub fn get(&self, id: PointId) -> Option<&GeoPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PointId) -> bool {
        self.get(id).is_some()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn names(points: &[GeoPoint]) -> Vec<String> {
        points.iter().map(|p| p.name.clone()).collect()
    }

    fn sample_store() -> PointStore {
        let mut store = PointStore::new();
        store.add("Denver", 39.7392, -104.9903).unwrap();
        store.add("Boulder", 40.015, -105.2705).unwrap();
        store.add("Aurora", 39.7294, -104.8319).unwrap();
        store
    }

    #[test]
    fn test_add_normalizes_and_keeps_latitude() {
        let mut store = PointStore::new();
        let point = store.add("", 91.5, 370.2).unwrap();

        assert_eq!(point.lat, 91.5);
        assert_eq!(point.lon, 10.2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let mut store = PointStore::new();
        let first = store.add("First", 40.0, -105.0).unwrap();

        let second = store.add("Second", 40.0, -105.0);
        assert!(matches!(second, Err(EditorError::DuplicatePoint { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(first.id).unwrap().name, "First");
    }

    #[test]
    fn test_add_duplicate_after_rounding_and_wrapping() {
        let mut store = PointStore::new();
        store.add("A", 40.0, -105.0).unwrap();

        assert!(store.try_add("B", 40.0000000004, -105.0).is_none());
        assert!(store.try_add("C", 40.0, 255.0).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_rejects_non_finite() {
        let mut store = PointStore::new();
        assert!(matches!(
            store.add("x", f64::NAN, 0.0),
            Err(EditorError::InvalidCoordinate { .. })
        ));
        assert!(store.add("x", 0.0, f64::INFINITY).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = sample_store();
        let id = store.points()[1].id;

        assert!(store.remove(id).is_some());
        assert!(store.remove(id).is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(names(store.points()), vec!["Denver", "Aurora"]);
    }

    #[test]
    fn test_sort_toggles_per_key() {
        let mut store = sample_store();

        assert_eq!(store.sort(SortKey::Lat), Direction::Ascending);
        assert_eq!(names(store.points()), vec!["Aurora", "Denver", "Boulder"]);

        assert_eq!(store.sort(SortKey::Lat), Direction::Descending);
        assert_eq!(names(store.points()), vec!["Boulder", "Denver", "Aurora"]);

        assert_eq!(store.sort(SortKey::Lat), Direction::Ascending);
        assert_eq!(names(store.points()), vec!["Aurora", "Denver", "Boulder"]);
    }

    #[test]
    fn test_sort_directions_are_independent() {
        let mut store = sample_store();

        store.sort(SortKey::Name);
        store.sort(SortKey::Name);
        // lat has its own history: first lat sort is ascending
        assert_eq!(store.sort(SortKey::Lat), Direction::Ascending);
        assert_eq!(store.sort(SortKey::Name), Direction::Ascending);
        assert_eq!(names(store.points()), vec!["Aurora", "Boulder", "Denver"]);

        assert_eq!(store.sort_directions().last(SortKey::Lat), Some(Direction::Ascending));
        assert_eq!(store.sort_directions().last(SortKey::Lon), None);
    }

    #[test]
    fn test_sort_by_lon() {
        let mut store = sample_store();
        store.sort(SortKey::Lon);
        assert_eq!(names(store.points()), vec!["Boulder", "Denver", "Aurora"]);
    }

    #[test]
    fn test_filter_empty_returns_all_in_order() {
        let store = sample_store();
        assert_eq!(names(&store.filter("")), vec!["Denver", "Boulder", "Aurora"]);
    }

    #[test]
    fn test_filter_subset_preserves_order() {
        let mut store = sample_store();
        store.add("Denver Airport", 39.8561, -104.6737).unwrap();

        assert_eq!(
            names(&store.filter("denver")),
            vec!["Denver", "Denver Airport"]
        );
        assert_eq!(names(&store.filter("ra")), vec!["Aurora"]);
        assert!(store.filter("zzz").is_empty());
    }

    #[test]
    fn test_filter_regex_patterns() {
        let store = sample_store();

        assert_eq!(names(&store.filter("^Den.*r$")), vec!["Denver"]);
        assert_eq!(names(&store.filter("^(b|a)")), vec!["Boulder", "Aurora"]);
        assert!(store.filter("^ra").is_empty());
    }

    #[test]
    fn test_filter_invalid_regex_falls_back_to_text() {
        let mut store = PointStore::new();
        store.add("Park (north)", 1.0, 1.0).unwrap();
        store.add("Park", 2.0, 2.0).unwrap();

        assert_eq!(names(&store.filter("(NORTH")), vec!["Park (north)"]);

        store.set_filter("(north");
        assert_eq!(names(&store.filtered()), vec!["Park (north)"]);
        assert_eq!(store.first_filtered().map(|p| p.name.as_str()), Some("Park (north)"));
    }

    #[test]
    fn test_add_huge_latitude_stays_finite() {
        let mut store = PointStore::new();
        let point = store.add("", 1e303, 0.0).unwrap();

        assert!(point.lat.is_finite());
        assert!(store.points()[0].lat.is_finite());
    }

    #[test]
    fn test_filtered_view_is_live() {
        let mut store = sample_store();
        store.set_filter("o");
        assert_eq!(names(&store.filtered()), vec!["Boulder", "Aurora"]);

        store.add("Golden", 39.7555, -105.2211).unwrap();
        assert_eq!(names(&store.filtered()), vec!["Boulder", "Aurora", "Golden"]);

        let boulder = store.filtered()[0].id;
        store.set_name(boulder, "Lyons").unwrap();
        assert_eq!(names(&store.filtered()), vec!["Lyons", "Aurora", "Golden"]);

        store.set_name(boulder, "Nederland").unwrap();
        assert_eq!(names(&store.filtered()), vec!["Aurora", "Golden"]);
    }

    #[test]
    fn test_exists_is_structural() {
        let mut store = sample_store();
        let mut candidate = store.points()[0].clone();
        candidate.id = PointId::new();
        candidate.name = "Other name".to_string();

        assert!(store.exists(&candidate));
        store.remove(store.points()[0].id);
        assert!(!store.exists(&candidate));
    }

    #[test]
    fn test_set_position_rejects_occupied_place() {
        let mut store = sample_store();
        let denver = store.points()[0].clone();
        let boulder = store.points()[1].clone();

        let result = store.set_position(boulder.id, denver.lat, denver.lon);
        assert!(matches!(result, Err(EditorError::DuplicatePoint { .. })));
        assert_eq!(store.get(boulder.id).unwrap().lat, boulder.lat);

        // Moving onto its own place is allowed
        assert!(store.set_position(denver.id, denver.lat, denver.lon).is_ok());
    }

    #[test]
    fn test_observers_receive_events() {
        let mut store = PointStore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = store.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let p = store.add("A", 1.0, 2.0).unwrap();
        store.try_add("dup", 1.0, 2.0);
        store.sort(SortKey::Name);
        store.remove(p.id);
        store.remove(p.id);

        {
            let seen = events.lock().unwrap();
            assert_eq!(seen.len(), 3);
            assert_eq!(seen[0], StoreEvent::Added { id: p.id });
            assert_eq!(
                seen[1],
                StoreEvent::Reordered {
                    key: SortKey::Name,
                    direction: Direction::Ascending
                }
            );
            assert_eq!(seen[2], StoreEvent::Removed { id: p.id });
        }

        assert!(store.unsubscribe(sub));
        store.add("B", 3.0, 4.0).unwrap();
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("place"), Some(SortKey::Name));
        assert_eq!(SortKey::parse("LAT"), Some(SortKey::Lat));
        assert_eq!(SortKey::parse("lng"), Some(SortKey::Lon));
        assert_eq!(SortKey::parse("altitude"), None);
    }
}
