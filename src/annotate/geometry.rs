//! # Annotation Geometry
//!
//! Coordinate mapping between the pointer's surface space and the image's
//! own space, plus the aspect-preserving fit of an image into a surface.

use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The rectangle an image occupies inside a surface, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fit an image into a surface without distortion, centered.
///
/// Relatively wider images scale to the surface width and center
/// vertically (letterbox); otherwise they scale to the surface height and
/// center horizontally (pillarbox). Equal ratios fill the surface exactly.
pub fn fit_rect(image_w: f32, image_h: f32, surface_w: f32, surface_h: f32) -> DrawRect {
    let image_ratio = image_w / image_h;
    let surface_ratio = surface_w / surface_h;

    if image_ratio > surface_ratio {
        let width = surface_w;
        let height = surface_w / image_ratio;
        DrawRect {
            x: 0.0,
            y: (surface_h - height) / 2.0,
            width,
            height,
        }
    } else {
        let height = surface_h;
        let width = surface_h * image_ratio;
        DrawRect {
            x: (surface_w - width) / 2.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// One pointer event in surface-local pixels.
///
/// Carries the surface's bounding size sampled at event time rather than a
/// cached value, because the surface may resize between events (device
/// rotation). `touch_count` is `Some` for touch pointers and `None` for
/// mouse input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerInput {
    pub x: f32,
    pub y: f32,
    pub surface_width: f32,
    pub surface_height: f32,
    #[serde(default)]
    pub touch_count: Option<u32>,
}

impl PointerInput {
    /// Map this event into normalized image coordinates.
    ///
    /// Returns `None` for events that must be ignored: touch events with
    /// zero active contacts, degenerate surfaces, and non-finite input.
    /// Points falling in the letterbox/pillarbox margin clamp to the
    /// nearest image edge.
    pub fn map_to_image(&self, image_w: f32, image_h: f32) -> Option<Point> {
        if self.touch_count == Some(0) {
            return None;
        }
        if !(self.x.is_finite() && self.y.is_finite()) {
            return None;
        }
        if self.surface_width <= 0.0 || self.surface_height <= 0.0 {
            return None;
        }
        if image_w <= 0.0 || image_h <= 0.0 {
            return None;
        }

        let rect = fit_rect(image_w, image_h, self.surface_width, self.surface_height);
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return None;
        }

        let x = ((self.x - rect.x) / rect.width).clamp(0.0, 1.0);
        let y = ((self.y - rect.y) / rect.height).clamp(0.0, 1.0);
        Some(Point::new(x, y))
    }
}
