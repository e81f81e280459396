//! # Annotation Canvas Engine
//!
//! Holds a decoded still image and an ordered stack of freehand strokes.
//! Pointer events are mapped into normalized image coordinates on arrival,
//! commits push onto the stack, undo pops exactly one, and export
//! rasterizes image plus committed strokes into a new artifact.
//!
//! ## Repaint Model:
//! Every accepted pointer move triggers a full repaint of all committed
//! strokes plus the in-progress one rather than an incremental blit. The
//! engine tracks that obligation as a monotonic repaint counter.

use crate::annotate::geometry::{Point, PointerInput};
use crate::annotate::raster;
use crate::capture::artifact::{ArtifactKind, CapturedArtifact};
use crate::error::{CaptureError, CaptureResult};
use image::RgbaImage;
use tracing::{debug, warn};

/// Stroke color: opaque red.
pub const STROKE_COLOR: [u8; 4] = [255, 0, 0, 255];

/// Stroke width in surface pixels.
pub const STROKE_WIDTH: f32 = 5.0;

/// Export quality: high but lossy.
pub const EXPORT_JPEG_QUALITY: u8 = 95;

/// One continuous freehand path from pointer-down to pointer-up, points in
/// normalized image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: [u8; 4],
    pub width: f32,
}

impl Stroke {
    fn new() -> Self {
        Self {
            points: Vec::new(),
            color: STROKE_COLOR,
            width: STROKE_WIDTH,
        }
    }
}

/// Drawing surface over one captured image.
#[derive(Debug)]
pub struct AnnotationCanvasEngine {
    image: RgbaImage,
    surface_width: u32,
    surface_height: u32,
    strokes: Vec<Stroke>,
    current: Option<Stroke>,
    repaints: u64,
}

impl AnnotationCanvasEngine {
    /// Load a captured image into a drawing surface.
    ///
    /// Only image artifacts can be annotated. An undecodable payload or a
    /// zero-sized surface is a lost drawing surface: annotation is
    /// unavailable for this artifact, capture itself is unaffected.
    pub fn load(
        artifact: &CapturedArtifact,
        surface_width: u32,
        surface_height: u32,
    ) -> CaptureResult<Self> {
        if artifact.kind() != ArtifactKind::Image {
            return Err(CaptureError::SurfaceLost(
                "only image artifacts can be annotated".to_string(),
            ));
        }
        if surface_width == 0 || surface_height == 0 {
            return Err(CaptureError::SurfaceLost(format!(
                "surface has no area: {}x{}",
                surface_width, surface_height
            )));
        }

        let image = raster::decode(artifact.payload())?;
        debug!(
            image_width = image.width(),
            image_height = image.height(),
            surface_width,
            surface_height,
            "Annotation surface loaded"
        );

        Ok(Self {
            image,
            surface_width,
            surface_height,
            strokes: Vec::new(),
            current: None,
            repaints: 0,
        })
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.len()
    }

    pub fn has_pending_stroke(&self) -> bool {
        self.current.is_some()
    }

    /// Number of full repaints triggered by accepted pointer events.
    pub fn repaint_count(&self) -> u64 {
        self.repaints
    }

    /// Begin a new stroke at the given pointer position.
    ///
    /// Ignored events (zero-contact touches, degenerate geometry) start
    /// nothing. A begin while another stroke is in flight commits the old
    /// one first rather than dropping input on the floor.
    pub fn begin_stroke(&mut self, input: PointerInput) {
        if self.current.is_some() {
            warn!("Stroke begin while another stroke in progress, committing previous");
            self.commit_stroke();
        }

        match self.map(input) {
            Some(point) => {
                let mut stroke = Stroke::new();
                stroke.points.push(point);
                self.current = Some(stroke);
                self.repaints += 1;
            }
            None => debug!("Ignored stroke begin event"),
        }
    }

    /// Extend the in-progress stroke. Events without a stroke in progress
    /// are ignored; the pointer may have gone down outside the surface.
    pub fn extend_stroke(&mut self, input: PointerInput) {
        let Some(point) = self.map(input) else {
            debug!("Ignored stroke extend event");
            return;
        };

        match self.current.as_mut() {
            Some(stroke) => {
                stroke.points.push(point);
                self.repaints += 1;
            }
            None => debug!("Stroke extend without active stroke"),
        }
    }

    /// Commit the in-progress stroke onto the stack.
    ///
    /// A stroke needs at least two points to be visible; anything shorter
    /// is discarded. Returns whether a stroke was committed.
    pub fn commit_stroke(&mut self) -> bool {
        match self.current.take() {
            Some(stroke) if stroke.points.len() > 1 => {
                self.strokes.push(stroke);
                true
            }
            Some(_) => {
                debug!("Discarding stroke with fewer than 2 points");
                false
            }
            None => false,
        }
    }

    /// Pop the most recently committed stroke. No-op on an empty stack,
    /// never an error. Returns whether a stroke was removed.
    pub fn undo(&mut self) -> bool {
        let popped = self.strokes.pop().is_some();
        if popped {
            self.repaints += 1;
        }
        popped
    }

    /// Rasterize the image plus all committed strokes into a new artifact
    /// at the surface's pixel dimensions. An in-progress stroke is not
    /// part of the export.
    pub fn export(&self) -> CaptureResult<CapturedArtifact> {
        let canvas = raster::compose(
            &self.image,
            self.surface_width,
            self.surface_height,
            &self.strokes,
        );
        let bytes = raster::encode_jpeg(&canvas, EXPORT_JPEG_QUALITY)?;
        Ok(CapturedArtifact::image(
            bytes,
            "image/jpeg",
            self.surface_width,
            self.surface_height,
        ))
    }

    /// Map an event into image space and refresh the surface size from
    /// the event's own bounding rectangle.
    fn map(&mut self, input: PointerInput) -> Option<Point> {
        let mapped = input.map_to_image(self.image.width() as f32, self.image.height() as f32);
        if mapped.is_some() && input.surface_width >= 1.0 && input.surface_height >= 1.0 {
            self.surface_width = input.surface_width.round() as u32;
            self.surface_height = input.surface_height.round() as u32;
        }
        mapped
    }
}
