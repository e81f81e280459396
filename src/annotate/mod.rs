//! # Annotation Module
//!
//! Freehand annotation over a captured still image.
//!
//! ## Key Components:
//! - **Geometry**: pointer-to-image coordinate mapping and the
//!   letterbox/pillarbox fit algorithm (`geometry`)
//! - **Canvas Engine**: the stroke stack with undo and export (`canvas`)
//! - **Raster**: composites image plus strokes and encodes the JPEG
//!   export (`raster`)
//!
//! ## Coordinate Spaces:
//! Pointer events arrive in surface-local pixels together with the
//! surface's bounding size at event time. They are mapped through the
//! image's draw rectangle into normalized image coordinates, so strokes
//! stay glued to the image even when the surface resizes mid-annotation.

pub mod canvas;       // Stroke stack, undo, export
pub mod geometry;     // Fit math and pointer mapping
pub mod raster;       // Compositing and JPEG encode
