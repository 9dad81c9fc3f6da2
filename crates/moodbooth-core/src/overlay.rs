//! Detection overlay: a display list per frame plus an RGBA rasterizer.

use crate::emotion::{classify, Emotion};
use crate::types::{BoundingBox, FaceDetection};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Serialize;

pub(crate) const OVERLAY_COLOR: Rgba<u8> = Rgba([0x00, 0xff, 0x88, 0xff]);
const BOX_THICKNESS: i32 = 2;
const LANDMARK_RADIUS: i32 = 2;

/// Everything drawn over one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Overlay {
    /// Native frame size; the overlay canvas matches it.
    pub width: u32,
    pub height: u32,
    pub dominant: Option<Emotion>,
    pub countdown: Option<u32>,
    pub faces: Vec<OverlayFace>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlayFace {
    pub bbox: BoundingBox,
    pub landmarks: Vec<(f32, f32)>,
    /// Label drawn above the box.
    pub caption: String,
}

impl Overlay {
    /// Build the display list for a frame's detections.
    pub fn build(
        width: u32,
        height: u32,
        detections: &[FaceDetection],
        countdown: Option<u32>,
    ) -> Self {
        let dominant = classify(detections).map(|c| c.emotion);
        let caption = match (dominant, countdown) {
            (Some(e), Some(n)) => format!("{e} ({n}s)"),
            (Some(e), None) => e.to_string(),
            (None, _) => String::new(),
        };

        let faces = detections
            .iter()
            .map(|d| OverlayFace {
                bbox: d.bbox,
                landmarks: d.landmarks.clone().unwrap_or_default(),
                caption: caption.clone(),
            })
            .collect();

        Self {
            width,
            height,
            dominant,
            countdown,
            faces,
        }
    }

    /// Rasterize boxes and landmark points onto a transparent canvas.
    ///
    /// Text is not rasterized. Captions and the countdown are only available
    /// from the display list itself (`faces[].caption`, `countdown`).
    pub fn render(&self) -> RgbaImage {
        let mut canvas = RgbaImage::new(self.width, self.height);

        for face in &self.faces {
            let Some((x, y, w, h)) = face.bbox.clamp_to(self.width, self.height) else {
                continue;
            };
            for inset in 0..BOX_THICKNESS {
                let iw = w as i32 - 2 * inset;
                let ih = h as i32 - 2 * inset;
                if iw <= 0 || ih <= 0 {
                    break;
                }
                let rect =
                    Rect::at(x as i32 + inset, y as i32 + inset).of_size(iw as u32, ih as u32);
                draw_hollow_rect_mut(&mut canvas, rect, OVERLAY_COLOR);
            }
            for &(lx, ly) in &face.landmarks {
                draw_filled_circle_mut(
                    &mut canvas,
                    (lx.round() as i32, ly.round() as i32),
                    LANDMARK_RADIUS,
                    OVERLAY_COLOR,
                );
            }
        }

        canvas
    }
}
