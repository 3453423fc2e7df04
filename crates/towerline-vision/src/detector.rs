//! The detector seam.

use crate::detection::Detection;
use image::RgbImage;

/// Errors raised while loading or running a detector.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Black-box object detector.
///
/// Implementations may return zero detections; callers must not assume any
/// ordering beyond the order returned.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}

impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        (**self).detect(image)
    }
}
