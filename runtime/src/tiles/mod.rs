//! Slippy-map tiles: remote sources, the cached store, and chip stitching.

pub mod rate_limiter;
pub mod source;
pub mod stitch;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use rate_limiter::RateLimiter;
pub use source::{HttpTileSource, TileSource, REFERENCE_OVERLAY_URL, WORLD_IMAGERY_URL};
pub use stitch::Chip;
pub use store::TileStore;

/// Failures while acquiring tiles or chips.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("request for {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tile server returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("failed to decode tile {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
    #[error("tile row {y} does not exist at zoom {z}")]
    OutOfRange { z: u8, y: i64 },
    #[error("tile grid must be odd and positive, got {0}")]
    InvalidGrid(u32),
    #[error("coordinate {0} cannot be projected")]
    Unprojectable(crate::geo::GeoPoint),
    #[error("tile fetch cancelled")]
    Cancelled,
    #[error("tile source unavailable: {0}")]
    Unavailable(String),
}
