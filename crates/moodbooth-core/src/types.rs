use crate::emotion::ExpressionScores;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Build a box from corner coordinates.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamp to `[0, width) × [0, height)` and return integer pixel bounds
    /// `(x, y, w, h)`, or `None` when nothing of the box lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = self.y.max(0.0).floor() as u32;
        let x2 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y2 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One face as reported by the detection collaborator for a single frame.
///
/// Transient: produced per frame and discarded after aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    /// Landmark points in frame coordinates, when the detector provides them.
    pub landmarks: Option<Vec<(f32, f32)>>,
    pub expressions: ExpressionScores,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_corners_inverted_is_empty() {
        let b = BoundingBox::from_corners(10.0, 10.0, 5.0, 5.0, 0.9);
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_clamp_to_frame() {
        let b = make_bbox(-5.0, 10.0, 50.0, 500.0);
        assert_eq!(b.clamp_to(40, 100), Some((0, 10, 40, 90)));
    }

    #[test]
    fn test_clamp_outside_frame() {
        let b = make_bbox(200.0, 200.0, 10.0, 10.0);
        assert_eq!(b.clamp_to(100, 100), None);
    }
}
