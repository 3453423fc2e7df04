//! `towerline chip` for saving the stitched chip around one coordinate.

use crate::cancel::CancelToken;
use crate::cli::context;
use crate::cli::output::{self, Styled};
use crate::cli::progress;
use crate::config::Config;
use crate::geo::{geo_to_pixel, GeoPoint};
use anyhow::{Context, Result};
use std::path::Path;
use towerline_vision::Annotator;

pub async fn run(
    config: &Config,
    lat: f64,
    lon: f64,
    zoom: Option<u8>,
    tile_count: Option<u32>,
    out: &Path,
    mark: bool,
) -> Result<()> {
    let s = Styled::new();
    let coord = GeoPoint::new(lat, lon)?;
    let zoom = zoom.unwrap_or(config.imagery.zoom);
    let tile_count = tile_count.unwrap_or(config.imagery.tile_count);

    let cache = context::open_cache(&config.imagery)?;
    let tiles = context::tile_store(&config.imagery, &config.imagery.url_template, cache)?;

    let spinner = progress::create_spinner(
        &format!("Fetching {tile_count}x{tile_count} tiles around {coord}"),
        output::is_quiet() || output::is_json(),
    );
    let chip = tiles
        .chip_at(coord, zoom, tile_count, &CancelToken::new())
        .await
        .with_context(|| format!("failed to build chip at {coord}"));
    spinner.finish_and_clear();
    let mut chip = chip?;

    if mark {
        let p = geo_to_pixel(coord, &chip.view);
        Annotator::new(None, 12.0).mark(&mut chip.image, p.x, p.y);
    }
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    chip.image
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": out.display().to_string(),
            "width": chip.image.width(),
            "height": chip.image.height(),
            "zoom": zoom,
            "requested": chip.requested,
            "center": chip.view.center,
        }));
    } else if !output::is_quiet() {
        eprintln!(
            "  {} {}x{} chip centered at {} written to {}",
            s.ok_sym(),
            chip.image.width(),
            chip.image.height(),
            chip.view.center,
            s.cyan(&out.display().to_string())
        );
    }
    Ok(())
}
