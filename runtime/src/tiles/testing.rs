//! In-memory tile source for tests.

use super::{TileError, TileSource};
use crate::geo::{TileKey, TILE_SIZE};
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Color a tile is painted with: x and y low bytes, zoom in blue.
pub(crate) fn tile_color(key: TileKey) -> Rgb<u8> {
    Rgb([(key.x % 256) as u8, (key.y % 256) as u8, key.z.wrapping_mul(10)])
}

pub(crate) fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("png encoding of an in-memory image");
    out.into_inner()
}

/// Serves solid tiles colored by [`tile_color`].
#[derive(Default)]
pub(crate) struct ColorTileSource {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl ColorTileSource {
    pub fn failing() -> Self {
        let source = Self::default();
        source.failing.store(true, Ordering::SeqCst);
        source
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileSource for ColorTileSource {
    fn tile_url(&self, key: TileKey) -> String {
        format!("mem://tiles/{}/{}/{}", key.z, key.y, key.x)
    }

    async fn fetch(&self, key: TileKey) -> Result<Vec<u8>, TileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TileError::Status {
                url: self.tile_url(key),
                status: 503,
            });
        }
        let tile = RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, tile_color(key));
        Ok(encode_png(&tile))
    }
}
