//! Building the long-lived pieces a command needs from the configuration.

use crate::cache::DiskCache;
use crate::config::{Config, DetectorSettings, ImagerySettings};
use crate::tiles::{HttpTileSource, RateLimiter, TileStore};
use anyhow::{bail, Context, Result};
use image::Rgb;
use std::path::Path;
use std::sync::Arc;
use towerline_vision::{Annotator, YoloDetector};
use tracing::debug;

/// The shared tile cache, unless disabled.
pub fn open_cache(imagery: &ImagerySettings) -> Result<Option<Arc<DiskCache>>> {
    if imagery.no_cache {
        return Ok(None);
    }
    let path = imagery
        .cache_path
        .clone()
        .unwrap_or_else(DiskCache::default_path);
    debug!(path = %path.display(), "opening tile cache");
    Ok(Some(Arc::new(DiskCache::open(&path)?)))
}

/// A cached HTTP tile store for `template`.
pub fn tile_store(
    imagery: &ImagerySettings,
    template: &str,
    cache: Option<Arc<DiskCache>>,
) -> Result<TileStore> {
    let limiter = RateLimiter::new(imagery.max_concurrent, imagery.min_delay_ms);
    let source = HttpTileSource::new(template, limiter, imagery.timeout())
        .context("failed to create tile source")?;
    Ok(TileStore::new(Arc::new(source), cache).with_ttl(imagery.tile_ttl()))
}

/// Chip annotator using the configured font, or any system font.
pub fn annotator(settings: &DetectorSettings) -> Result<Annotator> {
    let annotator = match &settings.font_path {
        Some(path) => Annotator::from_font_file(path, settings.font_size)
            .with_context(|| format!("failed to load font: {}", path.display()))?,
        None => Annotator::with_system_font(settings.font_size),
    };
    Ok(annotator.with_text_color(Rgb(settings.label_color)))
}

/// The ONNX detector named by `model` or the config's `model_path`.
pub fn open_detector(config: &Config, model: Option<&Path>) -> Result<YoloDetector> {
    let Some(path) = model.or(config.model_path.as_deref()) else {
        bail!("no detector model given; set model_path or pass --model");
    };
    if !path.exists() {
        bail!("model file not found: {}", path.display());
    }
    YoloDetector::open(path, config.detector.yolo_config())
        .with_context(|| format!("failed to load model: {}", path.display()))
}
