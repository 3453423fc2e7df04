//! Geodesy: WGS84 points, raster views, and the conversions between them.
//!
//! Two conversions exist. [`projection`] is the exact Web-Mercator mapping
//! used by the traversal engine; [`local`] is a flat-earth approximation
//! driven by a ground calibration, only valid for offsets of a few hundred
//! pixels.

pub mod local;
pub mod projection;

pub use local::{add_pixel_offset_to_coordinate, GroundCalibration};
pub use projection::{geo_to_pixel, pixel_to_geo, tile_for, TILE_SIZE};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Latitude limit of the Web-Mercator square world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Highest zoom accepted by the tile pipeline.
pub const MAX_ZOOM: u8 = 22;

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Rejected coordinate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("coordinate out of range: lat {lat}, lon {lon}")]
pub struct InvalidCoordinate {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Validating constructor used at ingestion.
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidCoordinate> {
        let point = Self { lat, lon };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(InvalidCoordinate { lat, lon })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Whether the point can be projected onto the Web-Mercator raster.
    pub fn is_projectable(&self) -> bool {
        self.is_valid() && self.lat.abs() <= MAX_MERCATOR_LAT
    }

    /// Both axes within `epsilon` degrees. Longitude is compared the short
    /// way around, so -180 and 180 are the same meridian.
    pub fn approx_eq(&self, other: &GeoPoint, epsilon: f64) -> bool {
        let dlon = projection::wrap_lon(self.lon - other.lon);
        (self.lat - other.lat).abs() < epsilon && dlon.abs() < epsilon
    }

    /// Great-circle distance in meters (haversine, mean earth radius).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_008.8;
        let (p1, p2) = (self.lat.to_radians(), other.lat.to_radians());
        let dp = p2 - p1;
        let dl = (other.lon - self.lon).to_radians();
        let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Raster-local position, origin top-left, y growing downward.
///
/// Coordinates are fractional so that box centers and inverse projections
/// keep sub-pixel precision; round only when drawing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Nearest integer pixel.
    pub fn rounded(&self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

/// Everything needed to map pixels of one rendered raster to the ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    /// Geographic position of the raster's exact center pixel.
    pub center: GeoPoint,
    pub zoom: u8,
    pub width_px: u32,
    pub height_px: u32,
}

impl MapView {
    pub fn new(center: GeoPoint, zoom: u8, width_px: u32, height_px: u32) -> Self {
        Self {
            center,
            zoom,
            width_px,
            height_px,
        }
    }

    /// Raster center in pixels.
    pub fn center_px(&self) -> PixelPoint {
        PixelPoint::new(self.width_px as f64 / 2.0, self.height_px as f64 / 2.0)
    }
}

/// Slippy-map tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Tiles per axis at this zoom.
    pub fn world_tiles(z: u8) -> u64 {
        1u64 << z
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.y, self.x)
    }
}
