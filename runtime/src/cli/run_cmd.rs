//! `towerline run` for tracing every facility in the configured list.

use crate::cancel::CancelToken;
use crate::cli::context;
use crate::cli::output::{self, Styled};
use crate::cli::progress;
use crate::config::Config;
use crate::facilities::{load_facilities, Facility};
use crate::trace::TowerFollower;
use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Command-line overrides for a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub max_depth: Option<u32>,
    pub max_visited: Option<usize>,
    /// Trace only the first `n` facilities.
    pub limit: Option<usize>,
    pub no_chips: bool,
}

/// Per-facility result line.
#[derive(Debug, Clone, Serialize)]
pub struct FacilityOutcome {
    pub index: usize,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub processed: usize,
    pub nodes: usize,
    pub failures: usize,
    pub chips: usize,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl FacilityOutcome {
    fn new(facility: &Facility) -> Self {
        Self {
            index: facility.index,
            name: facility.name.clone(),
            lat: facility.location.lat,
            lon: facility.location.lon,
            processed: 0,
            nodes: 0,
            failures: 0,
            chips: 0,
            cancelled: false,
            error: None,
        }
    }
}

/// Trace facilities with at most `workers` in flight. Each facility gets its
/// own visited set; a failing facility does not stop the others.
pub async fn trace_all(
    follower: Arc<TowerFollower>,
    facilities: Vec<Facility>,
    output_root: Option<&Path>,
    workers: usize,
    bar: &ProgressBar,
) -> Vec<FacilityOutcome> {
    let mut outcomes: Vec<FacilityOutcome> = stream::iter(facilities)
        .map(|facility| {
            let follower = Arc::clone(&follower);
            async move {
                let mut outcome = FacilityOutcome::new(&facility);
                match follower.trace_facility(&facility, output_root).await {
                    Ok(report) => {
                        outcome.processed = report.processed;
                        outcome.nodes = report.nodes.len();
                        outcome.failures = report.failures();
                        outcome.chips = report.chips_written();
                        outcome.cancelled = report.cancelled;
                        info!(
                            facility = facility.index,
                            processed = report.processed,
                            nodes = report.nodes.len(),
                            "facility traced"
                        );
                    }
                    Err(e) => {
                        error!(facility = facility.index, error = %e, "facility failed");
                        outcome.error = Some(format!("{e:#}"));
                    }
                }
                outcome
            }
        })
        .buffer_unordered(workers.max(1))
        .inspect(|outcome| {
            bar.inc(1);
            bar.set_message(format!("facility {} found {}", outcome.index, outcome.processed));
        })
        .collect()
        .await;
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

pub async fn run(config: Config, opts: RunOptions) -> Result<()> {
    let s = Styled::new();
    let started = Instant::now();

    let Some(csv_path) = config.facilities_csv.as_deref() else {
        bail!("facilities_csv is not set in the configuration");
    };
    let region = config.region()?;
    let mut facilities = load_facilities(csv_path, region.as_ref())?;
    if let Some(limit) = opts.limit {
        facilities.truncate(limit);
    }
    if facilities.is_empty() {
        warn!("no facilities to trace");
    }

    let mut settings = config.follow_settings();
    if let Some(d) = opts.max_depth {
        settings.limits.max_depth = d;
    }
    if let Some(v) = opts.max_visited {
        settings.limits.max_visited = v;
    }
    let workers = opts.workers.unwrap_or(config.follow.workers);
    let output_dir = opts.output_dir.unwrap_or_else(|| config.output_dir.clone());
    let write_chips = config.follow.write_chips && !opts.no_chips;

    let cache = context::open_cache(&config.imagery)?;
    let tiles = Arc::new(context::tile_store(&config.imagery, &config.imagery.url_template, cache)?);
    let detector = Arc::new(context::open_detector(&config, None)?);
    let annotator = Arc::new(context::annotator(&config.detector)?);

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let follower = Arc::new(TowerFollower::new(tiles, detector, annotator, settings).with_cancel(cancel));

    if !output::is_quiet() && !output::is_json() {
        output::print_header(&s);
        eprintln!(
            "  Tracing {} facilities (zoom {}, {}x{} tiles, {} workers)",
            facilities.len(),
            settings.zoom,
            settings.tile_count,
            settings.tile_count,
            workers
        );
    }
    let bar = progress::facility_progress(facilities.len(), output::is_quiet() || output::is_json());
    let root = write_chips.then_some(output_dir.as_path());
    let outcomes = trace_all(follower, facilities, root, workers, &bar).await;
    bar.finish_and_clear();

    let total: usize = outcomes.iter().map(|o| o.processed).sum();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let elapsed = started.elapsed().as_secs();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "facilities": outcomes,
            "total_detections": total,
            "failed_facilities": failed,
            "elapsed_secs": elapsed,
            "output_dir": write_chips.then(|| output_dir.display().to_string()),
        }));
    } else if !output::is_quiet() {
        for o in &outcomes {
            let sym = if o.error.is_some() { s.fail_sym() } else { s.ok_sym() };
            let label = o.name.clone().unwrap_or_else(|| format!("#{}", o.index));
            let detail = match &o.error {
                Some(e) => s.red(e),
                None => format!("{} towers, {} chips, {} failed branches", o.processed, o.chips, o.failures),
            };
            output::print_check(sym, &label, &detail);
        }
        eprintln!();
        eprintln!(
            "  {} {} towers across {} facilities in {}",
            s.ok_sym(),
            s.bold(&total.to_string()),
            outcomes.len(),
            output::format_duration(elapsed)
        );
        if write_chips {
            eprintln!("  Chips written under {}", s.cyan(&output_dir.display().to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::tiles::testing::ColorTileSource;
    use crate::tiles::TileStore;
    use crate::trace::FollowSettings;
    use image::RgbImage;
    use towerline_vision::{Annotator, DetectError, Detection, Detector};

    struct NoTowers;

    impl Detector for NoTowers {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_trace_all_keeps_order() {
        let tiles = Arc::new(TileStore::new(Arc::new(ColorTileSource::default()), None));
        let settings = FollowSettings {
            tile_count: 1,
            ..FollowSettings::default()
        };
        let follower = Arc::new(TowerFollower::new(
            tiles,
            Arc::new(NoTowers),
            Arc::new(Annotator::new(None, 12.0)),
            settings,
        ));
        let facilities: Vec<Facility> = (0..5)
            .map(|i| Facility {
                index: i,
                name: None,
                location: GeoPoint {
                    lat: 10.0 + i as f64,
                    lon: 20.0,
                },
            })
            .collect();
        let dir = tempfile::tempdir().unwrap();

        let outcomes = trace_all(follower, facilities, Some(dir.path()), 3, &ProgressBar::hidden()).await;

        let indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
        assert!(outcomes.iter().all(|o| o.processed == 0 && o.nodes == 1 && o.chips == 1));
        assert!(dir.path().join("4").join("0.png").exists());
    }
}
