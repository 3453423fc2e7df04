//! Detector seam and chip annotation.
//!
//! The traversal engine only ever sees the [`Detector`] trait and the
//! [`Detection`] records it returns. [`YoloDetector`] is the production
//! implementation, backed by an ONNX export of a YOLOv8 model.

pub mod annotate;
pub mod detection;
pub mod detector;
pub mod yolo;

pub use annotate::{border_color, luminance, Annotator, Label};
pub use detection::{BoundingBox, Detection};
pub use detector::{DetectError, Detector};
pub use yolo::{YoloConfig, YoloDetector};
