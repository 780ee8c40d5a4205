// 📄 CSV Codec - point set <-> `name,lat,lon` text
//
// Export writes values exactly as stored (they were normalized on the way in).
// Import is header-driven: columns may come in any order, extra columns are
// ignored, and a row whose lat/lon does not parse is skipped without aborting
// the rest of the file. Parsed rows are NOT added here; the session feeds them
// through the same add path as interactive creation.

use anyhow::{Context, Result as AnyResult};
use log::{info, warn};
use serde::Serialize;
use std::path::Path;

use crate::coords;
use crate::error::{EditorError, Result};
use crate::point::GeoPoint;

pub const HEADER: [&str; 3] = ["name", "lat", "lon"];

/// One parsed import row, not yet normalized or deduplicated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRow {
    pub line: u64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedRow {
    pub line: u64,
    pub reason: String,
}

impl From<MalformedRow> for EditorError {
    fn from(row: MalformedRow) -> Self {
        EditorError::MalformedImportRow {
            line: row.line,
            reason: row.reason,
        }
    }
}

/// Result of parsing a CSV document
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportBatch {
    pub rows: Vec<PointRow>,
    pub malformed: Vec<MalformedRow>,
}

// ============================================================================
// SERIALIZE
// ============================================================================

pub fn serialize(points: &[GeoPoint]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for point in points {
        let lat = point.lat.to_string();
        let lon = point.lon.to_string();
        writer.write_record([point.name.as_str(), lat.as_str(), lon.as_str()])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EditorError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// DESERIALIZE
// ============================================================================

struct Columns {
    name: Option<usize>,
    lat: usize,
    lon: usize,
}

fn locate_columns(headers: &csv::StringRecord) -> Result<Columns> {
    let find = |aliases: &[&str]| {
        headers
            .iter()
            .position(|h| aliases.contains(&h.trim().to_lowercase().as_str()))
    };

    let lat = find(&["lat", "latitude"]);
    let lon = find(&["lon", "lng", "longitude"]);

    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Columns {
            name: find(&["name", "place"]),
            lat,
            lon,
        }),
        _ => Err(MalformedRow {
            line: 1,
            reason: format!("header must name lat and lon columns, got {:?}", headers),
        }
        .into()),
    }
}

fn parse_field(
    record: &csv::StringRecord,
    index: usize,
    label: &str,
) -> std::result::Result<f64, String> {
    let raw = record.get(index).unwrap_or("");
    coords::parse_coordinate(raw).map_err(|_| format!("{} {:?} is not a number", label, raw))
}

/// Parse CSV text into candidate rows.
///
/// Only a missing lat/lon header fails the whole document.
pub fn deserialize(text: &str) -> Result<ImportBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let columns = locate_columns(&headers)?;

    let mut batch = ImportBatch::default();

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or(0);
                warn!("Skipping unreadable CSV row {}: {}", line, err);
                batch.malformed.push(MalformedRow {
                    line,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let line = record.position().map(|p| p.line()).unwrap_or(0);

        // Papa-style trailing blank rows
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let parsed = parse_field(&record, columns.lat, "lat")
            .and_then(|lat| parse_field(&record, columns.lon, "lon").map(|lon| (lat, lon)));

        match parsed {
            Ok((lat, lon)) => batch.rows.push(PointRow {
                line,
                name: columns
                    .name
                    .and_then(|i| record.get(i))
                    .unwrap_or("")
                    .to_string(),
                lat,
                lon,
            }),
            Err(reason) => {
                warn!("Skipping CSV row {}: {}", line, reason);
                batch.malformed.push(MalformedRow { line, reason });
            }
        }
    }

    Ok(batch)
}

// ============================================================================
// FILE HELPERS
// ============================================================================

pub fn read_file(path: &Path) -> AnyResult<ImportBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let batch = deserialize(&text).context("Failed to parse CSV header")?;
    info!(
        "Parsed {} rows ({} malformed) from {}",
        batch.rows.len(),
        batch.malformed.len(),
        path.display()
    );
    Ok(batch)
}

pub fn write_file(path: &Path, points: &[GeoPoint]) -> AnyResult<()> {
    let text = serialize(points).context("Failed to serialize points")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Exported {} points to {}", points.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PointStore;

    fn store_from(batch: &ImportBatch) -> PointStore {
        let mut store = PointStore::new();
        for row in &batch.rows {
            store.try_add(&row.name, row.lat, row.lon);
        }
        store
    }

    #[test]
    fn test_serialize_header_and_rows() {
        let mut store = PointStore::new();
        store.add("Denver", 39.73, -104.99).unwrap();
        store.add("", 40.0, 10.2).unwrap();

        let text = serialize(store.points()).unwrap();
        assert_eq!(text, "name,lat,lon\nDenver,39.73,-104.99\n,40,10.2\n");
    }

    #[test]
    fn test_serialize_empty_set_has_header() {
        assert_eq!(serialize(&[]).unwrap(), "name,lat,lon\n");
    }

    #[test]
    fn test_serialize_quotes_commas() {
        let mut store = PointStore::new();
        store.add("Denver, CO", 39.73, -104.99).unwrap();

        let text = serialize(store.points()).unwrap();
        assert!(text.contains("\"Denver, CO\""));

        let batch = deserialize(&text).unwrap();
        assert_eq!(batch.rows[0].name, "Denver, CO");
    }

    #[test]
    fn test_round_trip() {
        let mut store = PointStore::new();
        store.add("Denver", 39.7392, -104.9903).unwrap();
        store.add("Boulder", 40.015, -105.2705).unwrap();
        store.add("", -33.8688, 151.2093).unwrap();

        let first = serialize(store.points()).unwrap();
        let reloaded = store_from(&deserialize(&first).unwrap());
        let second = serialize(reloaded.points()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trip_keeps_name_whitespace() {
        let mut store = PointStore::new();
        store.add(" Park ", 1.0, 2.0).unwrap();

        let first = serialize(store.points()).unwrap();
        let batch = deserialize(&first).unwrap();
        assert_eq!(batch.rows[0].name, " Park ");

        let second = serialize(store_from(&batch).points()).unwrap();
        assert_eq!(first, "name,lat,lon\n Park ,1,2\n");
        assert_eq!(first, second);
    }

    #[test]
    fn test_coordinate_fields_are_trimmed() {
        let batch = deserialize(" name , lat , lon \nA,  1.5 , -2 \n").unwrap();
        assert_eq!(batch.rows[0].lat, 1.5);
        assert_eq!(batch.rows[0].lon, -2.0);
    }

    #[test]
    fn test_header_driven_columns() {
        let text = "lon,extra,name,lat\n-104.99,x,Denver,39.73\n";
        let batch = deserialize(text).unwrap();

        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].name, "Denver");
        assert_eq!(batch.rows[0].lat, 39.73);
        assert_eq!(batch.rows[0].lon, -104.99);
    }

    #[test]
    fn test_missing_name_column_gives_empty_names() {
        let batch = deserialize("Latitude,Longitude\n1.5,2.5\n").unwrap();
        assert_eq!(batch.rows[0].name, "");
        assert_eq!(batch.rows[0].lon, 2.5);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let text = "name,lat,lon\nA,1,2\nB,abc,3\nC,4,\nD,5,6\n";
        let batch = deserialize(text).unwrap();

        let names: Vec<_> = batch.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "D"]);
        assert_eq!(batch.malformed.len(), 2);
        assert_eq!(batch.malformed[0].line, 3);
        assert!(batch.malformed[0].reason.contains("lat"));
    }

    #[test]
    fn test_blank_trailing_rows_ignored() {
        let batch = deserialize("name,lat,lon\nA,1,2\n,,\n").unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert!(batch.malformed.is_empty());
    }

    #[test]
    fn test_missing_coordinate_header_fails() {
        let result = deserialize("name,x,y\nA,1,2\n");
        assert!(matches!(result, Err(EditorError::MalformedImportRow { line: 1, .. })));
    }
}
