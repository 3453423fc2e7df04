//! Stitching tiles into chips.
//!
//! Both entry points compose a pixel window of the global Web-Mercator
//! raster: [`TileStore::stitch`] aligns the window to a tile grid,
//! [`TileStore::chip_at`] centers it on a coordinate.

use super::{TileError, TileStore};
use crate::cancel::CancelToken;
use crate::geo::projection::{project, unproject};
use crate::geo::{GeoPoint, MapView, TileKey, TILE_SIZE};
use futures::future::try_join_all;
use image::{imageops, RgbImage};
use tracing::debug;

/// A stitched raster and the view that maps its pixels to the ground.
#[derive(Debug, Clone)]
pub struct Chip {
    pub image: RgbImage,
    pub view: MapView,
    /// Coordinate the chip was requested for; within a pixel of the center.
    pub requested: GeoPoint,
}

impl TileStore {
    /// Composite the odd `tile_count × tile_count` grid centered on `center`,
    /// left to right, top to bottom. Any tile failure fails the whole grid.
    pub async fn stitch(
        &self,
        center: TileKey,
        tile_count: u32,
        cancel: &CancelToken,
    ) -> Result<RgbImage, TileError> {
        let side = grid_side(tile_count)?;
        let half = (tile_count / 2) as i64;
        let tile = TILE_SIZE as i64;
        let left = (center.x as i64 - half) * tile;
        let top = (center.y as i64 - half) * tile;
        self.compose(center.z, left, top, side, side, cancel).await
    }

    /// Chip of `256 · tile_count` pixels square whose center pixel lies
    /// within one pixel of `coord`.
    pub async fn chip_at(
        &self,
        coord: GeoPoint,
        zoom: u8,
        tile_count: u32,
        cancel: &CancelToken,
    ) -> Result<Chip, TileError> {
        if !coord.is_projectable() {
            return Err(TileError::Unprojectable(coord));
        }
        let side = grid_side(tile_count)?;
        let half = side as f64 / 2.0;
        let (gx, gy) = project(coord, zoom);
        let left = (gx - half).floor() as i64;
        let top = (gy - half).floor() as i64;

        let image = self.compose(zoom, left, top, side, side, cancel).await?;
        let center = unproject(left as f64 + half, top as f64 + half, zoom);
        Ok(Chip {
            image,
            view: MapView::new(center, zoom, side, side),
            requested: coord,
        })
    }

    /// Compose the global-pixel window `[left, left + width) × [top, top + height)`.
    /// Columns wrap around the antimeridian; rows outside the world fail.
    async fn compose(
        &self,
        zoom: u8,
        left: i64,
        top: i64,
        width: u32,
        height: u32,
        cancel: &CancelToken,
    ) -> Result<RgbImage, TileError> {
        let tile = TILE_SIZE as i64;
        let world_tiles = TileKey::world_tiles(zoom) as i64;
        let (tx0, tx1) = (left.div_euclid(tile), (left + width as i64 - 1).div_euclid(tile));
        let (ty0, ty1) = (top.div_euclid(tile), (top + height as i64 - 1).div_euclid(tile));

        let mut placements = Vec::new();
        for ty in ty0..=ty1 {
            if ty < 0 || ty >= world_tiles {
                return Err(TileError::OutOfRange { z: zoom, y: ty });
            }
            for tx in tx0..=tx1 {
                let key = TileKey::new(zoom, tx.rem_euclid(world_tiles) as u32, ty as u32);
                placements.push((key, tx * tile - left, ty * tile - top));
            }
        }
        debug!(zoom, left, top, tiles = placements.len(), "composing chip");

        let tiles = try_join_all(placements.iter().map(|&(key, _, _)| async move {
            if cancel.is_cancelled() {
                return Err(TileError::Cancelled);
            }
            self.fetch_tile(key).await
        }))
        .await?;

        let mut canvas = RgbImage::new(width, height);
        for ((_, x, y), tile) in placements.iter().zip(tiles) {
            imageops::replace(&mut canvas, &tile.to_rgb8(), *x, *y);
        }
        Ok(canvas)
    }
}

fn grid_side(tile_count: u32) -> Result<u32, TileError> {
    if tile_count == 0 || tile_count % 2 == 0 {
        return Err(TileError::InvalidGrid(tile_count));
    }
    tile_count
        .checked_mul(TILE_SIZE)
        .ok_or(TileError::InvalidGrid(tile_count))
}
