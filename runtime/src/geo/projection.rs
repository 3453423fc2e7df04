//! Web-Mercator pixel ↔ WGS84 conversions at a fixed zoom.
//!
//! Global pixel space is `256 · 2^zoom` pixels square with the origin at
//! (lat 85.05°, lon −180°). A [`MapView`] places its center coordinate at
//! the raster's center pixel, so raster-local pixels are global pixels
//! shifted by half the raster size.

use super::{GeoPoint, MapView, PixelPoint, TileKey};
use std::f64::consts::PI;

/// Side of one slippy-map tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Equatorial ground resolution at zoom 0, meters per pixel.
const EQUATOR_M_PER_PX_Z0: f64 = 156_543.033_92;

/// Width of the whole world in pixels at `zoom`.
pub fn world_size_px(zoom: u8) -> f64 {
    TILE_SIZE as f64 * 2f64.powi(zoom as i32)
}

/// Global pixel position of `geo`.
pub fn project(geo: GeoPoint, zoom: u8) -> (f64, f64) {
    let world = world_size_px(zoom);
    let sin_lat = geo.lat.to_radians().sin();
    let x = (geo.lon + 180.0) / 360.0 * world;
    let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI)) * world;
    (x, y)
}

/// Longitude folded into `[-180, 180)`.
pub fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Inverse of [`project`]. `x` outside the world wraps across the antimeridian.
pub fn unproject(x: f64, y: f64, zoom: u8) -> GeoPoint {
    let world = world_size_px(zoom);
    let lon = wrap_lon(x / world * 360.0 - 180.0);
    let n = PI - 2.0 * PI * y / world;
    let lat = n.sinh().atan().to_degrees();
    GeoPoint { lat, lon }
}

/// Geographic position of a raster pixel.
pub fn pixel_to_geo(px: PixelPoint, view: &MapView) -> GeoPoint {
    let (cx, cy) = project(view.center, view.zoom);
    let half = view.center_px();
    unproject(cx + (px.x - half.x), cy + (px.y - half.y), view.zoom)
}

/// Raster pixel of a geographic position; exact inverse of [`pixel_to_geo`].
pub fn geo_to_pixel(geo: GeoPoint, view: &MapView) -> PixelPoint {
    let (cx, cy) = project(view.center, view.zoom);
    let (gx, gy) = project(geo, view.zoom);
    let world = world_size_px(view.zoom);
    // shortest way around, so points across the antimeridian stay adjacent
    let dx = (gx - cx + world / 2.0).rem_euclid(world) - world / 2.0;
    let half = view.center_px();
    PixelPoint::new(dx + half.x, gy - cy + half.y)
}

/// Tile containing `geo` (standard slippy-map integer formula).
pub fn tile_for(geo: GeoPoint, zoom: u8) -> TileKey {
    let n = TileKey::world_tiles(zoom) as f64;
    let lat_rad = geo.lat.to_radians();
    let x = ((geo.lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();
    let max = n - 1.0;
    TileKey::new(zoom, x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32)
}

/// Web-Mercator ground resolution in meters per pixel at `lat`.
pub fn ground_resolution_m(lat: f64, zoom: u8) -> f64 {
    EQUATOR_M_PER_PX_Z0 * lat.to_radians().cos() / 2f64.powi(zoom as i32)
}
