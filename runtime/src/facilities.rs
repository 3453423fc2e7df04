//! Facility list ingestion.
//!
//! Facilities come from a CSV file with a header row. Latitude and longitude
//! columns are found by name, and an optional `name` or `id` column labels
//! the facility in logs.

use crate::geo::GeoPoint;
use crate::region::Region;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const LAT_COLUMNS: &[&str] = &["latitude", "lat", "y"];
const LON_COLUMNS: &[&str] = &["longitude", "lon", "lng", "long", "x"];
const NAME_COLUMNS: &[&str] = &["name", "id", "facility", "plant_name"];

/// A traversal root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facility {
    /// Position in the input list; names the output directory.
    pub index: usize,
    pub name: Option<String>,
    pub location: GeoPoint,
}

impl Facility {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|want| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(want))
    })
}

/// Parse facilities from CSV text or any reader.
pub fn read_facilities<R: Read>(reader: R) -> Result<Vec<Facility>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    let Some(lat_col) = find_column(&headers, LAT_COLUMNS) else {
        bail!("no latitude column (expected one of {})", LAT_COLUMNS.join(", "));
    };
    let Some(lon_col) = find_column(&headers, LON_COLUMNS) else {
        bail!("no longitude column (expected one of {})", LON_COLUMNS.join(", "));
    };
    let name_col = find_column(&headers, NAME_COLUMNS);

    let mut facilities = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let record = record.with_context(|| format!("row {line}: malformed CSV"))?;
        let field = |col: usize, what: &str| -> Result<f64> {
            let raw = record
                .get(col)
                .with_context(|| format!("row {line}: missing {what}"))?;
            raw.parse::<f64>()
                .with_context(|| format!("row {line}: invalid {what} {raw:?}"))
        };
        let lat = field(lat_col, "latitude")?;
        let lon = field(lon_col, "longitude")?;
        let location = GeoPoint::new(lat, lon).with_context(|| format!("row {line}"))?;
        let name = name_col
            .and_then(|c| record.get(c))
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        facilities.push(Facility {
            index: facilities.len(),
            name,
            location,
        });
    }
    debug!(count = facilities.len(), "parsed facilities");
    Ok(facilities)
}

/// Load facilities from a CSV file, keeping those inside `region` if given.
/// Indices are assigned after filtering.
pub fn load_facilities(path: &Path, region: Option<&Region>) -> Result<Vec<Facility>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open facilities file: {}", path.display()))?;
    let all = read_facilities(file).with_context(|| format!("in {}", path.display()))?;
    let total = all.len();

    let kept: Vec<Facility> = match region {
        Some(region) => {
            let bounds = region.bounds();
            if let Some(b) = bounds {
                debug!(
                    min_lon = b.min_x,
                    min_lat = b.min_y,
                    max_lon = b.max_x,
                    max_lat = b.max_y,
                    "region bounds"
                );
            }
            all.into_iter()
                .filter(|f| {
                    bounds.map_or(true, |b| b.contains(f.location)) && region.contains(f.location)
                })
                .enumerate()
                .map(|(index, f)| Facility { index, ..f })
                .collect()
        }
        None => all,
    };
    info!(total, kept = kept.len(), "loaded facilities");
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSpec;

    #[test]
    fn test_reads_named_columns() {
        let csv = "name,latitude,longitude\nDos Cabezas,31.5964,-110.307589\nPlant B, 8.5 , -80.1\n";
        let facilities = read_facilities(csv.as_bytes()).unwrap();
        assert_eq!(facilities.len(), 2);
        assert_eq!(facilities[0].name.as_deref(), Some("Dos Cabezas"));
        assert_eq!(facilities[0].location.lat, 31.5964);
        assert_eq!(facilities[1].index, 1);
        assert_eq!(facilities[1].location.lon, -80.1);
    }

    #[test]
    fn test_fallback_columns() {
        let csv = "ID,Lon,Lat\nx1,-80.0,8.0\n";
        let facilities = read_facilities(csv.as_bytes()).unwrap();
        assert_eq!(facilities[0].location, GeoPoint { lat: 8.0, lon: -80.0 });
        assert_eq!(facilities[0].display_name(), "x1");
    }

    #[test]
    fn test_missing_column() {
        let err = read_facilities("name,lat\na,1.0\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("longitude"));
    }

    #[test]
    fn test_row_numbers_in_errors() {
        let csv = "lat,lon\n1.0,2.0\nabc,3.0\n";
        let err = read_facilities(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("row 3"));

        let csv = "lat,lon\n95.0,2.0\n";
        let err = read_facilities(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("row 2"));
    }

    #[test]
    fn test_region_filter_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plants.csv");
        std::fs::write(&path, "lat,lon\n50.0,10.0\n8.5,-80.0\n9.0,-78.0\n").unwrap();
        let region = Region::from_spec(&RegionSpec::Bounds([
            -82.9657830472,
            7.2205414901,
            -77.2425664944,
            9.61161001224,
        ]))
        .unwrap();

        let kept = load_facilities(&path, Some(&region)).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].index, 0);
        assert_eq!(kept[1].location.lon, -78.0);

        assert_eq!(load_facilities(&path, None).unwrap().len(), 3);
    }

    #[test]
    fn test_polygon_filter_excludes_box_corners() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plants.csv");
        // (1, 1) is inside the triangle, (9, 9) only inside its bounding box.
        std::fs::write(&path, "lat,lon\n1.0,1.0\n9.0,9.0\n20.0,20.0\n").unwrap();
        let region = Region::from_wkt("POLYGON((0 0, 10 0, 0 10, 0 0))").unwrap();

        let kept = load_facilities(&path, Some(&region)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].location, GeoPoint { lat: 1.0, lon: 1.0 });
    }
}
