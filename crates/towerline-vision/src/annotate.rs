//! Chip annotation: boxes, labels and a contrasting text border.

use crate::detection::BoundingBox;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::warn;

/// Font files tried, in order, by [`Annotator::with_system_font`].
const FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:/Windows/Fonts/arial.ttf",
];

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Relative luminance `Y = 0.2126 R + 0.7152 G + 0.0722 B` on the 0–255 scale.
pub fn luminance(color: Rgb<u8>) -> f64 {
    let [r, g, b] = color.0;
    0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64
}

/// Border for text drawn in `text`: white when the text luminance is more
/// than half the 0–255 range away from white, black otherwise.
pub fn border_color(text: Rgb<u8>) -> Rgb<u8> {
    if (255.0 - luminance(text)).abs() > 127.5 {
        WHITE
    } else {
        BLACK
    }
}

/// A box plus the text drawn at its center.
#[derive(Debug, Clone)]
pub struct Label {
    pub bbox: BoundingBox,
    pub text: String,
}

/// Draws detections onto chips.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
    text_color: Rgb<u8>,
    box_color: Rgb<u8>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>, size: f32) -> Self {
        Self {
            font,
            scale: PxScale::from(size),
            text_color: WHITE,
            box_color: Rgb([255, 0, 0]),
        }
    }

    /// Use the first font found in the well-known system locations. Without
    /// one, boxes are still drawn but labels are skipped.
    pub fn with_system_font(size: f32) -> Self {
        let font = FONT_PATHS
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .find_map(|p| load_font(p).ok());
        if font.is_none() {
            warn!("no TTF font found, chip labels will not be drawn");
        }
        Self::new(font, size)
    }

    pub fn from_font_file(path: &Path, size: f32) -> std::io::Result<Self> {
        Ok(Self::new(Some(load_font(path)?), size))
    }

    pub fn with_text_color(mut self, color: Rgb<u8>) -> Self {
        self.text_color = color;
        self
    }

    /// Draw every label's box, then its text anchored at the box center.
    pub fn draw(&self, image: &mut RgbImage, labels: &[Label]) {
        for label in labels {
            let b = label.bbox;
            let rect = Rect::at(b.x1.round() as i32, b.y1.round() as i32)
                .of_size((b.width().round() as u32).max(1), (b.height().round() as u32).max(1));
            draw_hollow_rect_mut(image, rect, self.box_color);

            let (cx, cy) = b.center();
            self.draw_text_with_border(image, cx.round() as i32, cy.round() as i32, &label.text);
        }
    }

    /// Cross marking a point of interest, such as the traversal root.
    pub fn mark(&self, image: &mut RgbImage, x: f64, y: f64) {
        let (x, y) = (x.round() as i32, y.round() as i32);
        for d in -6..=6 {
            draw_cross_mut(image, self.box_color, x + d, y);
            draw_cross_mut(image, self.box_color, x, y + d);
        }
    }

    fn draw_text_with_border(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
        let Some(font) = &self.font else {
            return;
        };
        let border = border_color(self.text_color);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if dx != 0 || dy != 0 {
                    draw_text_mut(image, border, x + dx, y + dy, self.scale, font, text);
                }
            }
        }
        draw_text_mut(image, self.text_color, x, y, self.scale, font, text);
    }
}

fn load_font(path: &Path) -> std::io::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: {e}", path.display()),
        )
    })
}
