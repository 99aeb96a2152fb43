//! Axis-aligned pixel boxes and the overlap measure used for identity matching.

use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer pixel box with `x2 >= x1` and `y2 >= y1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Box expressed as fractions of the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: i32,
    pub y: i32,
}

impl BoundingBox {
    /// Builds a box from two corners, ordering them so the box is never inverted.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Integer centre point, rounding toward negative infinity.
    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: ((self.x1 as i64 + self.x2 as i64).div_euclid(2)) as i32,
            y: ((self.y1 as i64 + self.y2 as i64).div_euclid(2)) as i32,
        }
    }

    /// Normalises against `size`. Zero dimensions are treated as 1 so degenerate
    /// frames never divide by zero.
    pub fn normalized(&self, size: ImageSize) -> NormalizedBox {
        let w = size.width.max(1) as f64;
        let h = size.height.max(1) as f64;
        NormalizedBox {
            x: self.x1 as f64 / w,
            y: self.y1 as f64 / h,
            w: self.width() as f64 / w,
            h: self.height() as f64 / h,
        }
    }

    /// Clamps the box into `[0, width] x [0, height]`.
    pub fn clamped(&self, size: ImageSize) -> Self {
        let max_x = size.width.min(i32::MAX as u32) as i32;
        let max_y = size.height.min(i32::MAX as u32) as i32;
        Self::new(
            self.x1.clamp(0, max_x),
            self.y1.clamp(0, max_y),
            self.x2.clamp(0, max_x),
            self.y2.clamp(0, max_y),
        )
    }
}

/// Intersection-over-Union of two boxes.
///
/// Disjoint boxes score exactly `0.0`; the union is floored at one square pixel.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = (a.x2.min(b.x2) as i64 - a.x1.max(b.x1) as i64).max(0);
    let ih = (a.y2.min(b.y2) as i64 - a.y1.max(b.y1) as i64).max(0);
    let intersection = iw * ih;
    if intersection == 0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    intersection as f32 / union.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(3, 4, 50, 80);
        assert_eq!(iou(&b, &b), 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(iou(&a, &b), 0.0);
        // Touching edges share no area.
        let c = BoundingBox::new(10, 0, 20, 10);
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn iou_is_symmetric() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 15, 15);
        assert_eq!(iou(&a, &b), iou(&b, &a));
        // 25 / (100 + 100 - 25)
        assert!((iou(&a, &b) - 25.0 / 175.0).abs() < 1e-6);
    }

    #[test]
    fn new_orders_corners() {
        let b = BoundingBox::new(10, 20, 0, 5);
        assert_eq!(b, BoundingBox { x1: 0, y1: 5, x2: 10, y2: 20 });
    }

    #[test]
    fn normalized_uses_current_frame_size() {
        let b = BoundingBox::new(10, 20, 30, 60);
        let n = b.normalized(ImageSize::new(100, 200));
        assert!((n.x - 0.10).abs() < 1e-9);
        assert!((n.y - 0.10).abs() < 1e-9);
        assert!((n.w - 0.20).abs() < 1e-9);
        assert!((n.h - 0.20).abs() < 1e-9);
    }

    #[test]
    fn normalized_floors_degenerate_dimensions() {
        let b = BoundingBox::new(0, 0, 4, 2);
        let n = b.normalized(ImageSize::new(0, 0));
        assert_eq!(n.w, 4.0);
        assert_eq!(n.h, 2.0);
    }

    #[test]
    fn centroid_floors() {
        assert_eq!(BoundingBox::new(0, 0, 5, 5).centroid(), Centroid { x: 2, y: 2 });
        assert_eq!(BoundingBox::new(-5, -5, 0, 0).centroid(), Centroid { x: -3, y: -3 });
    }
}
