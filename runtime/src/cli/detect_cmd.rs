//! `towerline detect` for running the tower detector over image files.

use crate::cli::context;
use crate::cli::output::{self, Styled};
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use towerline_vision::{Annotator, Detection, Detector, Label};

/// Where the annotated copy of `image` goes.
fn annotated_path(image: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| image.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}.detections.png"))
}

pub async fn run(
    config: &Config,
    model: Option<&Path>,
    images: &[PathBuf],
    out_dir: Option<&Path>,
) -> Result<()> {
    let s = Styled::new();
    let detector = Arc::new(context::open_detector(config, model)?);
    let annotator = Arc::new(context::annotator(&config.detector)?);
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut results = Vec::with_capacity(images.len());
    for path in images {
        let out = annotated_path(path, out_dir);
        let detections = {
            let (detector, annotator) = (Arc::clone(&detector), Arc::clone(&annotator));
            let (path, out) = (path.clone(), out.clone());
            tokio::task::spawn_blocking(move || {
                annotate_file(detector.as_ref(), &annotator, &path, &out)
            })
            .await
            .context("detector task failed")??
        };

        if !output::is_quiet() && !output::is_json() {
            output::print_check(
                s.ok_sym(),
                &path.display().to_string(),
                &format!("{} detections -> {}", detections.len(), out.display()),
            );
            if output::is_verbose() {
                for d in &detections {
                    let (cx, cy) = d.bbox.center();
                    eprintln!("        {} {:.2} at ({cx:.0}, {cy:.0})", d.class_label, d.confidence);
                }
            }
        }
        results.push(serde_json::json!({
            "image": path.display().to_string(),
            "annotated": out.display().to_string(),
            "detections": detections,
        }));
    }

    if output::is_json() {
        output::print_json(&serde_json::Value::Array(results));
    }
    Ok(())
}

/// Detect in `path`, draw the boxes and save the copy to `out`.
fn annotate_file(
    detector: &dyn Detector,
    annotator: &Annotator,
    path: &Path,
    out: &Path,
) -> Result<Vec<Detection>> {
    let mut image = image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_rgb8();
    let detections = detector.detect(&image)?;

    let labels: Vec<Label> = detections
        .iter()
        .map(|d| Label {
            bbox: d.bbox,
            text: format!("{} {:.2}", d.class_label, d.confidence),
        })
        .collect();
    annotator.draw(&mut image, &labels);
    image
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotated_path() {
        assert_eq!(
            annotated_path(Path::new("/data/chip.jpg"), None),
            PathBuf::from("/data/chip.detections.png")
        );
        assert_eq!(
            annotated_path(Path::new("/data/chip.jpg"), Some(Path::new("/out"))),
            PathBuf::from("/out/chip.detections.png")
        );
    }

    struct OneTower;

    impl Detector for OneTower {
        fn detect(&self, _image: &image::RgbImage) -> Result<Vec<Detection>, towerline_vision::DetectError> {
            Ok(vec![Detection::new(
                towerline_vision::BoundingBox::new(4.0, 4.0, 12.0, 12.0),
                "tower",
                0.9,
            )])
        }
    }

    #[tokio::test]
    async fn test_annotate_file_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("chip.png");
        image::RgbImage::new(32, 32).save(&input).unwrap();
        let out = annotated_path(&input, None);

        let (i, o) = (input.clone(), out.clone());
        let detections = tokio::task::spawn_blocking(move || {
            annotate_file(&OneTower, &Annotator::new(None, 12.0), &i, &o)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(detections.len(), 1);
        let annotated = image::open(&out).unwrap().to_rgb8();
        assert_eq!(annotated.get_pixel(4, 4), &image::Rgb([255, 0, 0]));
    }
}
