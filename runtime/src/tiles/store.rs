//! Cached tile access.

use super::{TileError, TileSource};
use crate::cache::{DiskCache, TILE_TTL};
use crate::geo::{TileKey, TILE_SIZE};
use image::{imageops, DynamicImage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A tile source fronted by the persistent cache.
///
/// This is the explicit context object handed to the stitcher, the traversal
/// engine and the proxy; the caller owns its lifetime.
pub struct TileStore {
    source: Arc<dyn TileSource>,
    cache: Option<Arc<DiskCache>>,
    ttl: Duration,
}

impl TileStore {
    pub fn new(source: Arc<dyn TileSource>, cache: Option<Arc<DiskCache>>) -> Self {
        Self {
            source,
            cache,
            ttl: TILE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn tile_url(&self, key: TileKey) -> String {
        self.source.tile_url(key)
    }

    /// Decoded tile for `key`, from cache when possible.
    ///
    /// Cached bytes that no longer decode are dropped and treated as a miss.
    /// Only bytes that decode are cached.
    pub async fn fetch_tile(&self, key: TileKey) -> Result<DynamicImage, TileError> {
        let url = self.source.tile_url(key);

        if let Some(bytes) = self.cached(&url) {
            match image::load_from_memory(&bytes) {
                Ok(tile) => return Ok(normalize(tile)),
                Err(e) => {
                    warn!(%url, error = %e, "corrupt cached tile, refetching");
                    self.evict(&url);
                }
            }
        }

        let bytes = self.source.fetch(key).await?;
        let tile = image::load_from_memory(&bytes).map_err(|source| TileError::Decode {
            url: url.clone(),
            source,
        })?;
        self.store(&url, &bytes);
        Ok(normalize(tile))
    }

    fn cached(&self, url: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        match cache.get(url) {
            Ok(hit) => {
                if hit.is_some() {
                    debug!(%url, "tile cache hit");
                }
                hit
            }
            Err(e) => {
                warn!(%url, error = %e, "tile cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn evict(&self, url: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(url) {
                warn!(%url, error = %e, "failed to evict cached tile");
            }
        }
    }

    fn store(&self, url: &str, bytes: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(url, bytes, self.ttl) {
                warn!(%url, error = %e, "failed to cache tile");
            }
        }
    }
}

/// Some servers hand out 512 px tiles; bring everything to the grid size.
fn normalize(tile: DynamicImage) -> DynamicImage {
    if tile.width() == TILE_SIZE && tile.height() == TILE_SIZE {
        tile
    } else {
        tile.resize_exact(TILE_SIZE, TILE_SIZE, imageops::FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::testing::{tile_color, ColorTileSource};

    fn temp_cache() -> (tempfile::TempDir, Arc<DiskCache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(&dir.path().join("cache.db")).unwrap());
        (dir, cache)
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache() {
        let (_dir, cache) = temp_cache();
        let source = Arc::new(ColorTileSource::default());
        let store = TileStore::new(source.clone(), Some(cache.clone()));
        let key = TileKey::new(18, 7, 9);

        let first = store.fetch_tile(key).await.unwrap().to_rgb8();
        let second = store.fetch_tile(key).await.unwrap().to_rgb8();
        assert_eq!(source.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.get_pixel(0, 0), &tile_color(key));
        assert!(cache.get("mem://tiles/18/9/7").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_refetched() {
        let (_dir, cache) = temp_cache();
        let source = Arc::new(ColorTileSource::default());
        let store = TileStore::new(source.clone(), Some(cache.clone()));
        let key = TileKey::new(18, 1, 2);
        cache.set(&store.tile_url(key), b"not an image", TILE_TTL).unwrap();

        let tile = store.fetch_tile(key).await.unwrap();
        assert_eq!(tile.width(), TILE_SIZE);
        assert_eq!(source.calls(), 1);
        let repaired = cache.get(&store.tile_url(key)).unwrap().unwrap();
        assert!(image::load_from_memory(&repaired).is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_entry_evicted_when_refetch_fails() {
        let (_dir, cache) = temp_cache();
        let store = TileStore::new(Arc::new(ColorTileSource::failing()), Some(cache.clone()));
        let key = TileKey::new(18, 3, 4);
        cache.set(&store.tile_url(key), b"garbage", TILE_TTL).unwrap();

        assert!(store.fetch_tile(key).await.is_err());
        assert!(cache.get(&store.tile_url(key)).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_cached() {
        let (_dir, cache) = temp_cache();
        let store = TileStore::new(Arc::new(ColorTileSource::failing()), Some(cache.clone()));
        let err = store.fetch_tile(TileKey::new(2, 1, 1)).await.unwrap_err();
        assert!(matches!(err, TileError::Status { status: 503, .. }));
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_works_without_cache() {
        let source = Arc::new(ColorTileSource::default());
        let store = TileStore::new(source.clone(), None);
        store.fetch_tile(TileKey::new(1, 0, 0)).await.unwrap();
        store.fetch_tile(TileKey::new(1, 0, 0)).await.unwrap();
        assert_eq!(source.calls(), 2);
    }
}
