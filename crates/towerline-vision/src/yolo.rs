//! YOLOv8 detector over ONNX Runtime.
//!
//! Chips are letterboxed into the square model input, run through the
//! session, and the `[1, 4 + classes, anchors]` output is decoded back into
//! raster-space boxes with per-class non-maximum suppression.

use crate::detection::{BoundingBox, Detection};
use crate::detector::{DetectError, Detector};
use image::{imageops, Rgb, RgbImage};
use ndarray::{Array4, ArrayView2, Axis, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Gray used by the YOLO letterbox padding.
const PAD_GRAY: u8 = 114;

/// Inference settings for [`YoloDetector`].
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Square model input side in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class names indexed by class id.
    pub class_names: Vec<String>,
    pub max_detections: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            class_names: vec!["tower".to_string()],
            max_detections: 300,
        }
    }
}

/// Mapping between the source raster and the letterboxed model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub src_width: u32,
    pub src_height: u32,
}

impl Letterbox {
    pub fn new(src_width: u32, src_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / src_width as f32).min(input_size as f32 / src_height as f32);
        let scaled_w = (src_width as f32 * scale).round();
        let scaled_h = (src_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - scaled_h) / 2.0).floor(),
            src_width,
            src_height,
        }
    }

    /// Map a model-input box back into source raster pixels, clipped to the
    /// raster.
    pub fn unmap(&self, b: BoundingBox) -> BoundingBox {
        let w = self.src_width as f32;
        let h = self.src_height as f32;
        BoundingBox::new(
            ((b.x1 - self.pad_x) / self.scale).clamp(0.0, w),
            ((b.y1 - self.pad_y) / self.scale).clamp(0.0, h),
            ((b.x2 - self.pad_x) / self.scale).clamp(0.0, w),
            ((b.y2 - self.pad_y) / self.scale).clamp(0.0, h),
        )
    }
}

/// ONNX Runtime backed YOLOv8 detector.
pub struct YoloDetector {
    session: Mutex<Session>,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load an exported `.onnx` model.
    pub fn open(model_path: &Path, config: YoloConfig) -> Result<Self, DetectError> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| DetectError::Load(format!("{}: {e}", model_path.display())))?;
        info!(model = %model_path.display(), classes = config.class_names.len(), "loaded detector");
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let size = self.config.input_size;
        let (input, letterbox) = letterbox(image, size);
        let tensor = Tensor::from_array(to_nchw(&input))
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::Inference("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectError::Output(e.to_string()))?;
        let output = output
            .into_dimensionality::<Ix3>()
            .map_err(|e| DetectError::Output(format!("expected rank-3 output: {e}")))?;

        let predictions = output.index_axis(Axis(0), 0);
        let detections = decode(predictions, &letterbox, &self.config)?;
        debug!(count = detections.len(), "yolo inference complete");
        Ok(detections)
    }
}

/// Resize into a padded square, preserving aspect ratio.
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let lb = Letterbox::new(image.width(), image.height(), size);
    let scaled_w = ((image.width() as f32 * lb.scale).round() as u32).max(1);
    let scaled_h = ((image.height() as f32 * lb.scale).round() as u32).max(1);
    let resized = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_GRAY; 3]));
    imageops::overlay(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);
    (canvas, lb)
}

fn to_nchw(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut array = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    array
}

/// Decode a YOLOv8 prediction matrix.
///
/// Accepts either `[4 + classes, anchors]` or the transposed layout; rows are
/// `cx, cy, w, h` followed by one score per class. The layout is picked by
/// which axis has `4 + class_names.len()` entries, falling back to the
/// shorter axis when neither does.
pub fn decode(
    predictions: ArrayView2<'_, f32>,
    letterbox: &Letterbox,
    config: &YoloConfig,
) -> Result<Vec<Detection>, DetectError> {
    let attributes = config.class_names.len() + 4;
    let (rows, cols) = predictions.dim();
    let transposed = match (rows == attributes, cols == attributes) {
        (true, _) => false,
        (false, true) => true,
        (false, false) => rows > cols,
    };
    let predictions = if transposed {
        predictions.reversed_axes()
    } else {
        predictions
    };
    if predictions.nrows() < 5 {
        return Err(DetectError::Output(format!(
            "prediction matrix has {} rows, need at least 5",
            predictions.nrows()
        )));
    }

    let mut candidates = Vec::new();
    for anchor in predictions.columns() {
        let (class_id, score) = anchor
            .iter()
            .skip(4)
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });
        if score < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let model_box = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0);
        let label = config
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"));
        candidates.push(Detection::new(letterbox.unmap(model_box), label, score));
    }

    let mut kept = non_max_suppression(candidates, config.iou_threshold);
    kept.truncate(config.max_detections);
    Ok(kept)
}

/// Greedy per-class NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_label == candidate.class_label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
