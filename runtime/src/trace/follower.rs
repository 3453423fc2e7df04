//! The tower-following engine.
//!
//! Exploration is a depth-first walk driven by an explicit LIFO stack. Each
//! step acquires a chip centered on the pending coordinate, runs the
//! detector, and pushes one child per detection in reverse so that children
//! are visited in detector order. Counting follows the recursive
//! formulation: a node contributes its detection count, and a traversal
//! returns the sum over every node it expanded.
//!
//! Tile and detector failures are local to the node that hit them: the node
//! is recorded as failed and contributes nothing, siblings carry on.

use super::ledger::VisitEvent;
use super::output::{ChipWriter, TraceOutput};
use super::visited::{VisitedSet, DEFAULT_EPSILON};
use crate::cancel::CancelToken;
use crate::facilities::Facility;
use crate::geo::{geo_to_pixel, pixel_to_geo, GeoPoint, PixelPoint};
use crate::tiles::{Chip, TileError, TileStore};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use towerline_vision::{Annotator, Detection, Detector, Label};

/// Hard caps on one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowLimits {
    /// Nodes deeper than this are not expanded.
    pub max_depth: u32,
    /// Once more coordinates than this are visited, nothing new is expanded.
    pub max_visited: usize,
}

impl Default for FollowLimits {
    fn default() -> Self {
        Self {
            max_depth: 50,
            max_visited: 50,
        }
    }
}

/// Chip geometry and caps for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowSettings {
    pub zoom: u8,
    /// Odd number of tiles per chip side.
    pub tile_count: u32,
    pub limits: FollowLimits,
    /// Revisit tolerance in degrees, per axis.
    pub epsilon: f64,
}

impl Default for FollowSettings {
    fn default() -> Self {
        Self {
            zoom: 18,
            tile_count: 11,
            limits: FollowLimits::default(),
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "error")]
pub enum NodeStatus {
    /// Detections found, children queued.
    Expanded,
    /// Chip acquired, nothing detected.
    Leaf,
    /// Chip acquisition or detection failed.
    Failed(String),
}

impl NodeStatus {
    fn label(&self) -> &'static str {
        match self {
            NodeStatus::Expanded => "expanded",
            NodeStatus::Leaf => "leaf",
            NodeStatus::Failed(_) => "failed",
        }
    }
}

/// One step of the exploration tree.
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub id: usize,
    pub parent: Option<usize>,
    pub depth: u32,
    pub coord: GeoPoint,
    pub detections: usize,
    pub chip: Option<PathBuf>,
    pub status: NodeStatus,
}

/// The exploration tree of one traversal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceReport {
    /// Total detections over every expanded node.
    pub processed: usize,
    /// Nodes in visiting order; `parent` indexes into this list.
    pub nodes: Vec<TraceNode>,
    pub cancelled: bool,
}

impl TraceReport {
    pub fn failures(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Failed(_)))
            .count()
    }

    pub fn chips_written(&self) -> usize {
        self.nodes.iter().filter(|n| n.chip.is_some()).count()
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// A coordinate waiting on the stack.
struct Pending {
    coord: GeoPoint,
    depth: u32,
    parent: Option<usize>,
}

/// Walks transmission lines outward from a starting coordinate.
pub struct TowerFollower {
    tiles: Arc<TileStore>,
    detector: Arc<dyn Detector>,
    annotator: Arc<Annotator>,
    settings: FollowSettings,
    cancel: CancelToken,
}

impl TowerFollower {
    pub fn new(
        tiles: Arc<TileStore>,
        detector: Arc<dyn Detector>,
        annotator: Arc<Annotator>,
        settings: FollowSettings,
    ) -> Self {
        Self {
            tiles,
            detector,
            annotator,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Trace one facility with a fresh visited set. Chips and the ledger go
    /// under `<output_root>/<facility index>/` when a root is given.
    pub async fn trace_facility(
        &self,
        facility: &Facility,
        output_root: Option<&Path>,
    ) -> Result<TraceReport> {
        let mut output = match output_root {
            Some(root) => Some(TraceOutput::create(root, facility.index)?),
            None => None,
        };
        let mut visited = VisitedSet::with_epsilon(self.settings.epsilon);
        let span = info_span!("facility", index = facility.index, name = facility.display_name());
        let report = self
            .follow(facility.location, 0, &mut visited, output.as_mut())
            .instrument(span)
            .await;
        Ok(report)
    }

    /// Explore from `start`, sharing `visited` with every node of the walk.
    pub async fn follow(
        &self,
        start: GeoPoint,
        depth: u32,
        visited: &mut VisitedSet,
        mut output: Option<&mut TraceOutput>,
    ) -> TraceReport {
        let limits = self.settings.limits;
        let mut report = TraceReport::default();
        let mut stack = vec![Pending {
            coord: start,
            depth,
            parent: None,
        }];

        while let Some(item) = stack.pop() {
            if self.cancel.is_cancelled() {
                info!(pending = stack.len() + 1, "traversal cancelled");
                report.cancelled = true;
                break;
            }
            if visited.contains(item.coord) {
                debug!(lat = item.coord.lat, lon = item.coord.lon, "already processed");
                continue;
            }
            if item.depth > limits.max_depth {
                debug!(depth = item.depth, "depth cap reached");
                continue;
            }
            if visited.len() > limits.max_visited {
                debug!(visited = visited.len(), "visit cap reached");
                continue;
            }

            let id = report.nodes.len();
            let mut node = TraceNode {
                id,
                parent: item.parent,
                depth: item.depth,
                coord: item.coord,
                detections: 0,
                chip: None,
                status: NodeStatus::Leaf,
            };

            let (chip, detections) = match self.acquire_and_detect(item.coord).await {
                Ok(step) => step,
                Err(StepError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(StepError::Failed(reason)) => {
                    warn!(
                        node = id,
                        depth = item.depth,
                        lat = item.coord.lat,
                        lon = item.coord.lon,
                        error = %reason,
                        "branch failed"
                    );
                    node.status = NodeStatus::Failed(reason);
                    record(&mut output, &node);
                    report.nodes.push(node);
                    continue;
                }
            };

            let children: Vec<GeoPoint> = detections
                .iter()
                .map(|d| {
                    let (x, y) = d.bbox.center();
                    pixel_to_geo(PixelPoint::new(x as f64, y as f64), &chip.view)
                })
                .collect();

            if let Some(out) = output.as_deref_mut() {
                let labels = labels_for(&detections, &children);
                match write_chip(out.chips.clone(), self.annotator.clone(), chip, labels).await {
                    Ok(path) => node.chip = Some(path),
                    Err(e) => warn!(node = id, error = %e, "failed to write chip"),
                }
            }

            node.detections = detections.len();
            info!(
                node = id,
                depth = item.depth,
                lat = item.coord.lat,
                lon = item.coord.lon,
                detections = detections.len(),
                chip = ?node.chip,
                "visited"
            );

            if detections.is_empty() {
                record(&mut output, &node);
                report.nodes.push(node);
                continue;
            }

            visited.insert(item.coord);
            report.processed += detections.len();
            node.status = NodeStatus::Expanded;
            record(&mut output, &node);
            report.nodes.push(node);

            for coord in children.into_iter().rev() {
                if !coord.is_projectable() {
                    warn!(node = id, lat = coord.lat, lon = coord.lon, "skipping unprojectable detection");
                    continue;
                }
                stack.push(Pending {
                    coord,
                    depth: item.depth + 1,
                    parent: Some(id),
                });
            }
        }

        report
    }

    async fn acquire_and_detect(&self, coord: GeoPoint) -> Result<(Chip, Vec<Detection>), StepError> {
        let chip = self
            .tiles
            .chip_at(coord, self.settings.zoom, self.settings.tile_count, &self.cancel)
            .await
            .map_err(|e| match e {
                TileError::Cancelled => StepError::Cancelled,
                other => StepError::Failed(format!("chip acquisition: {other}")),
            })?;

        let detector = Arc::clone(&self.detector);
        let (chip, detected) = tokio::task::spawn_blocking(move || {
            let detected = detector.detect(&chip.image);
            (chip, detected)
        })
        .await
        .map_err(|e| StepError::Failed(format!("detector task: {e}")))?;

        let detections = detected.map_err(|e| StepError::Failed(format!("detection: {e}")))?;
        Ok((chip, detections))
    }
}

enum StepError {
    Cancelled,
    Failed(String),
}

fn labels_for(detections: &[Detection], coords: &[GeoPoint]) -> Vec<Label> {
    detections
        .iter()
        .zip(coords)
        .map(|(d, c)| Label {
            bbox: d.bbox,
            text: format!("< {} {:.2} at {:.6}, {:.6}", d.class_label, d.confidence, c.lat, c.lon),
        })
        .collect()
}

/// Annotate and encode off the async runtime.
async fn write_chip(
    writer: ChipWriter,
    annotator: Arc<Annotator>,
    chip: Chip,
    labels: Vec<Label>,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        let Chip {
            mut image,
            view,
            requested,
        } = chip;
        annotator.draw(&mut image, &labels);
        let root = geo_to_pixel(requested, &view);
        annotator.mark(&mut image, root.x, root.y);
        writer.write(&image)
    })
    .await?
}

fn record(output: &mut Option<&mut TraceOutput>, node: &TraceNode) {
    let Some(out) = output.as_deref_mut() else {
        return;
    };
    let event = VisitEvent {
        timestamp: Utc::now().to_rfc3339(),
        facility: out.facility,
        node: node.id,
        parent: node.parent,
        depth: node.depth,
        lat: node.coord.lat,
        lon: node.coord.lon,
        detections: node.detections,
        chip: node.chip.as_ref().map(|p| p.display().to_string()),
        status: node.status.label().to_string(),
    };
    if let Err(e) = out.record(&event) {
        warn!(node = node.id, error = %e, "failed to append trace ledger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GroundCalibration;
    use crate::tiles::testing::ColorTileSource;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use towerline_vision::{BoundingBox, DetectError};

    /// Replays scripted responses, then returns nothing.
    #[derive(Default)]
    struct ScriptedDetector {
        script: Mutex<VecDeque<Result<Vec<Detection>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<Vec<Detection>, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(dets)) => Ok(dets),
                Some(Err(e)) => Err(DetectError::Inference(e)),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Always sees one tower at a fixed offset from the chip center.
    struct RepeatingDetector {
        bbox: BoundingBox,
        calls: AtomicUsize,
    }

    impl Detector for RepeatingDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Detection::new(self.bbox, "tower", 0.9)])
        }
    }

    fn tower(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), "tower", 0.8)
    }

    fn follower(
        source: Arc<ColorTileSource>,
        detector: Arc<dyn Detector>,
        settings: FollowSettings,
    ) -> TowerFollower {
        let tiles = Arc::new(TileStore::new(source, None));
        TowerFollower::new(tiles, detector, Arc::new(Annotator::new(None, 16.0)), settings)
    }

    fn small_chips() -> FollowSettings {
        FollowSettings {
            tile_count: 3,
            ..FollowSettings::default()
        }
    }

    const ROOT: GeoPoint = GeoPoint {
        lat: 31.5964,
        lon: -110.307589,
    };

    #[tokio::test]
    async fn test_facility_scenario() {
        let detector = Arc::new(ScriptedDetector::new(vec![Ok(vec![
            tower(1400.0, 1400.0, 1456.0, 1456.0),
            tower(0.0, 0.0, 50.0, 50.0),
        ])]));
        let follower = follower(
            Arc::new(ColorTileSource::default()),
            detector.clone(),
            FollowSettings::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut output = TraceOutput::chips_only(dir.path(), 0).unwrap();
        let mut visited = VisitedSet::new();

        let report = follower.follow(ROOT, 0, &mut visited, Some(&mut output)).await;

        assert_eq!(report.processed, 2);
        assert_eq!(detector.calls(), 3);
        for n in 0..3 {
            assert!(dir.path().join(format!("{n}.png")).exists(), "{n}.png missing");
        }
        assert!(!dir.path().join("3.png").exists());
        let first = image::open(dir.path().join("0.png")).unwrap();
        assert_eq!((first.width(), first.height()), (2816, 2816));

        // Children are visited in detector order.
        let near = report.nodes[1].coord;
        let far = report.nodes[2].coord;
        assert_eq!(report.nodes[1].parent, Some(0));
        assert_eq!(report.nodes[2].parent, Some(0));
        assert_eq!(report.nodes[1].status, NodeStatus::Leaf);

        // (1428, 1428) is 20 px south-east of the 1408 px center.
        assert!(near.lon > ROOT.lon && near.lat < ROOT.lat);
        // (25, 25) is 1383 px north-west.
        assert!(far.lon < ROOT.lon && far.lat > ROOT.lat);

        let cal = GroundCalibration::web_mercator(ROOT.lat, 18);
        let expected_near = cal.offset(ROOT, 20.0, -20.0);
        let expected_far = cal.offset(ROOT, -1383.0, 1383.0);
        assert!(near.distance_m(&expected_near) < 4.0);
        assert!(far.distance_m(&expected_far) < 4.0);

        // Only the expanded root is remembered.
        assert_eq!(visited.len(), 1);
        assert!(visited.contains(ROOT));
    }

    #[tokio::test]
    async fn test_revisit_returns_zero() {
        let detector = Arc::new(ScriptedDetector::new(vec![
            Ok(vec![tower(300.0, 300.0, 320.0, 320.0)]),
            Ok(vec![tower(300.0, 300.0, 320.0, 320.0)]),
        ]));
        let source = Arc::new(ColorTileSource::default());
        let follower = follower(source.clone(), detector.clone(), small_chips());
        let mut visited = VisitedSet::new();

        let first = follower.follow(ROOT, 0, &mut visited, None).await;
        assert_eq!(first.processed, 2);

        let calls_before = detector.calls();
        let tiles_before = source.calls();
        let again = GeoPoint {
            lat: ROOT.lat + 4e-7,
            lon: ROOT.lon - 4e-7,
        };
        let second = follower.follow(again, 0, &mut visited, None).await;
        assert_eq!(second.processed, 0);
        assert!(second.nodes.is_empty());
        assert_eq!(detector.calls(), calls_before);
        assert_eq!(source.calls(), tiles_before);
    }

    #[tokio::test]
    async fn test_terminates_on_depth_cap() {
        let detector = Arc::new(RepeatingDetector {
            bbox: BoundingBox::new(600.0, 600.0, 650.0, 650.0),
            calls: AtomicUsize::new(0),
        });
        let follower = follower(Arc::new(ColorTileSource::default()), detector.clone(), small_chips());
        let mut visited = VisitedSet::new();

        let report = follower.follow(ROOT, 0, &mut visited, None).await;

        // Depths 0 through 50 expand; depth 51 is refused.
        assert_eq!(report.processed, 51);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 51);
        assert_eq!(report.max_depth(), 50);
        assert_eq!(visited.len(), 51);
    }

    #[tokio::test]
    async fn test_terminates_on_visit_cap() {
        let detector = Arc::new(RepeatingDetector {
            bbox: BoundingBox::new(600.0, 100.0, 650.0, 150.0),
            calls: AtomicUsize::new(0),
        });
        let settings = FollowSettings {
            limits: FollowLimits {
                max_depth: 50,
                max_visited: 10,
            },
            ..small_chips()
        };
        let follower = follower(Arc::new(ColorTileSource::default()), detector.clone(), settings);
        let report = follower.follow(ROOT, 0, &mut VisitedSet::new(), None).await;

        assert_eq!(report.processed, 11);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_follows_across_antimeridian() {
        // 300 px east of the 384 px center of a 3x3 chip.
        let detector = Arc::new(ScriptedDetector::new(vec![Ok(vec![tower(
            674.0, 374.0, 694.0, 394.0,
        )])]));
        let follower = follower(Arc::new(ColorTileSource::default()), detector.clone(), small_chips());
        let start = GeoPoint { lat: 0.0, lon: 179.9999 };

        let report = follower.follow(start, 0, &mut VisitedSet::new(), None).await;

        assert_eq!(detector.calls(), 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.nodes.len(), 2);
        let child = report.nodes[1].coord;
        assert_eq!(report.nodes[1].status, NodeStatus::Leaf);
        assert!(child.is_valid(), "{child}");
        assert!(child.lon < -179.999, "{child}");
        assert!(start.distance_m(&child) < 400.0);
    }

    #[tokio::test]
    async fn test_tile_failure_is_branch_local() {
        let detector = Arc::new(ScriptedDetector::default());
        let follower = follower(Arc::new(ColorTileSource::failing()), detector.clone(), small_chips());
        let report = follower.follow(ROOT, 0, &mut VisitedSet::new(), None).await;

        assert_eq!(report.processed, 0);
        assert_eq!(report.failures(), 1);
        assert_eq!(detector.calls(), 0);
    }

    #[tokio::test]
    async fn test_detector_failure_spares_siblings() {
        let detector = Arc::new(ScriptedDetector::new(vec![
            Ok(vec![
                tower(100.0, 100.0, 120.0, 120.0),
                tower(600.0, 600.0, 620.0, 620.0),
            ]),
            Err("model exploded".into()),
            Ok(vec![tower(700.0, 100.0, 720.0, 120.0)]),
        ]));
        let follower = follower(Arc::new(ColorTileSource::default()), detector.clone(), small_chips());
        let report = follower.follow(ROOT, 0, &mut VisitedSet::new(), None).await;

        let statuses: Vec<&str> = report.nodes.iter().map(|n| n.status.label()).collect();
        assert_eq!(statuses, ["expanded", "failed", "expanded", "leaf"]);
        assert_eq!(report.processed, 3);
        assert_eq!(report.nodes[3].parent, Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let detector = Arc::new(ScriptedDetector::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let follower = follower(Arc::new(ColorTileSource::default()), detector.clone(), small_chips())
            .with_cancel(cancel);
        let report = follower.follow(ROOT, 0, &mut VisitedSet::new(), None).await;
        assert!(report.cancelled);
        assert!(report.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_trace_facility_writes_ledger() {
        let detector = Arc::new(ScriptedDetector::new(vec![Ok(vec![tower(
            400.0, 400.0, 420.0, 420.0,
        )])]));
        let follower = follower(Arc::new(ColorTileSource::default()), detector, small_chips());
        let dir = tempfile::tempdir().unwrap();
        let facility = Facility {
            index: 4,
            name: Some("Test Plant".into()),
            location: ROOT,
        };

        let report = follower.trace_facility(&facility, Some(dir.path())).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.chips_written(), 2);

        let ledger = std::fs::read_to_string(dir.path().join("4").join("trace.jsonl")).unwrap();
        let events: Vec<serde_json::Value> =
            ledger.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["facility"], 4);
        assert_eq!(events[0]["status"], "expanded");
        assert_eq!(events[1]["status"], "leaf");
        assert_eq!(events[1]["parent"], 0);
    }
}
