//! Flat-earth pixel offsets from a ground calibration.
//!
//! Error grows with distance from the origin because curvature and the
//! Mercator scale change are ignored; keep offsets within a few hundred
//! pixels and latitudes away from the poles, where `cos(lat)` vanishes.

use super::projection::ground_resolution_m;
use super::GeoPoint;

/// Meters per degree of latitude used by the flat-earth step.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Length of the reference marker imaged at zoom 18, meters.
const MARKER_LENGTH_M: f64 = 152.4;

/// Three pixel measurements of the reference marker at zoom 18.
const MARKER_MEASUREMENTS_PX: [f64; 3] = [401.2, 398.7, 408.6];

/// Ground size of one raster pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundCalibration {
    pub pixel_size_m: f64,
}

impl GroundCalibration {
    pub fn new(pixel_size_m: f64) -> Self {
        Self { pixel_size_m }
    }

    /// Calibrate from a marker of known length measured one or more times.
    pub fn from_marker(length_m: f64, measured_px: &[f64]) -> Option<Self> {
        if measured_px.is_empty() {
            return None;
        }
        let mean = measured_px.iter().sum::<f64>() / measured_px.len() as f64;
        (mean > 0.0).then(|| Self::new(length_m / mean))
    }

    /// Calibration matching the Web-Mercator ground resolution at `lat`.
    pub fn web_mercator(lat: f64, zoom: u8) -> Self {
        Self::new(ground_resolution_m(lat, zoom))
    }

    /// Translate `origin` by a pixel offset, east and north positive.
    pub fn offset(&self, origin: GeoPoint, dx_east_px: f64, dy_north_px: f64) -> GeoPoint {
        let deg_lat = self.pixel_size_m / METERS_PER_DEGREE;
        let deg_lon = self.pixel_size_m / (METERS_PER_DEGREE * origin.lat.to_radians().cos());
        GeoPoint {
            lat: origin.lat + dy_north_px * deg_lat,
            lon: origin.lon + dx_east_px * deg_lon,
        }
    }
}

impl Default for GroundCalibration {
    /// The zoom-18 marker calibration, about 0.3783 m per pixel.
    fn default() -> Self {
        let mean = MARKER_MEASUREMENTS_PX.iter().sum::<f64>() / MARKER_MEASUREMENTS_PX.len() as f64;
        Self::new(MARKER_LENGTH_M / mean)
    }
}

/// [`GroundCalibration::offset`] with the default marker calibration.
pub fn add_pixel_offset_to_coordinate(origin: GeoPoint, dx_east_px: f64, dy_north_px: f64) -> GeoPoint {
    GroundCalibration::default().offset(origin, dx_east_px, dy_north_px)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{pixel_to_geo, MapView, PixelPoint, TILE_SIZE};

    const LATS: [f64; 7] = [-60.0, -45.0, -15.0, 0.0, 15.0, 45.0, 60.0];
    const LONS: [f64; 7] = [-180.0, -90.0, -45.0, 0.0, 45.0, 90.0, 180.0];

    /// Local east/north meters between two nearby points.
    fn local_meters(from: GeoPoint, to: GeoPoint) -> (f64, f64) {
        let east = (to.lon - from.lon) * METERS_PER_DEGREE * from.lat.to_radians().cos();
        let north = (to.lat - from.lat) * METERS_PER_DEGREE;
        (east, north)
    }

    #[test]
    fn test_default_marker_calibration() {
        let cal = GroundCalibration::default();
        assert!((cal.pixel_size_m - 0.378_320_231_692).abs() < 1e-9);
        assert_eq!(
            GroundCalibration::from_marker(MARKER_LENGTH_M, &MARKER_MEASUREMENTS_PX),
            Some(cal)
        );
        assert!(GroundCalibration::from_marker(10.0, &[]).is_none());
    }

    #[test]
    fn test_south_east_move_signs() {
        let tile = TILE_SIZE as f64;
        let cal = GroundCalibration::default();
        for &lat in &LATS {
            for &lon in &LONS {
                let origin = GeoPoint { lat, lon };
                let moved = add_pixel_offset_to_coordinate(origin, tile, -tile);
                assert!(moved.lon > lon, "longitude must grow moving east from {origin}");
                assert!(moved.lat < lat, "latitude must shrink moving south from {origin}");

                let (east_m, north_m) = local_meters(origin, moved);
                let expected = cal.pixel_size_m * tile;
                assert!((east_m.abs() - expected).abs() < 4.0);
                assert!((north_m.abs() - expected).abs() < 4.0);
            }
        }
    }

    #[test]
    fn test_agrees_with_projection_for_small_offsets() {
        let zoom = 18;
        for &lat in &LATS {
            for &lon in &[-110.307589, -45.0, 0.0, 45.0, 90.0] {
                let origin = GeoPoint { lat, lon };
                let view = MapView::new(origin, zoom, 2816, 2816);
                let cal = GroundCalibration::web_mercator(lat, zoom);
                for &(dx, dy) in &[(256.0, 256.0), (-256.0, 128.0), (40.0, -200.0), (-1.0, -1.0)] {
                    let local = cal.offset(origin, dx, dy);
                    let c = view.center_px();
                    // Raster y grows southward.
                    let projected = pixel_to_geo(PixelPoint::new(c.x + dx, c.y - dy), &view);
                    let drift = local.distance_m(&projected);
                    assert!(drift < 4.0, "{origin} +({dx},{dy}) drifted {drift:.3} m");
                }
            }
        }
    }
}
