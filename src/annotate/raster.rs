//! # Raster Compositing
//!
//! Draws the fitted source image and committed strokes into a surface-sized
//! pixel buffer and encodes the JPEG export. Stroke segments are stamped
//! with a square brush stepped densely along each segment so arbitrary
//! slopes leave no gaps.

use crate::annotate::canvas::Stroke;
use crate::annotate::geometry::fit_rect;
use crate::error::{CaptureError, CaptureResult};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};

/// Decode an encoded still image into RGBA pixels.
pub fn decode(bytes: &[u8]) -> CaptureResult<RgbaImage> {
    let dynamic = image::load_from_memory(bytes)
        .map_err(|e| CaptureError::SurfaceLost(format!("image decode failed: {}", e)))?;
    Ok(dynamic.to_rgba8())
}

/// Composite the source image and all strokes onto a black surface-sized
/// canvas, image fitted and centered, strokes denormalized through the
/// same draw rectangle.
pub fn compose(
    source: &RgbaImage,
    surface_width: u32,
    surface_height: u32,
    strokes: &[Stroke],
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(surface_width, surface_height, Rgba([0, 0, 0, 255]));

    let rect = fit_rect(
        source.width() as f32,
        source.height() as f32,
        surface_width as f32,
        surface_height as f32,
    );

    let draw_w = (rect.width.round() as u32).max(1);
    let draw_h = (rect.height.round() as u32).max(1);
    let resized = imageops::resize(source, draw_w, draw_h, FilterType::Triangle);
    imageops::overlay(
        &mut canvas,
        &resized,
        rect.x.round() as i64,
        rect.y.round() as i64,
    );

    for stroke in strokes {
        for pair in stroke.points.windows(2) {
            let x0 = rect.x + pair[0].x * rect.width;
            let y0 = rect.y + pair[0].y * rect.height;
            let x1 = rect.x + pair[1].x * rect.width;
            let y1 = rect.y + pair[1].y * rect.height;
            draw_line(&mut canvas, x0, y0, x1, y1, stroke.width, stroke.color);
        }
    }

    canvas
}

/// Stamp a square brush along the segment. Steps at twice the segment
/// length so consecutive stamps overlap on any slope; every stamp is
/// bounds-checked against the canvas.
pub fn draw_line(
    img: &mut RgbaImage,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    thickness: f32,
    color: [u8; 4],
) {
    let dx = x1 - x0;
    let dy = y1 - y0;
    let len = (dx * dx + dy * dy).sqrt();
    let steps = (len * 2.0) as i32;
    let half_t = (thickness / 2.0).max(0.5) as i32;
    let (w, h) = (img.width() as i32, img.height() as i32);

    for i in 0..=steps {
        let t = i as f32 / steps.max(1) as f32;
        let cx = (x0 + dx * t) as i32;
        let cy = (y0 + dy * t) as i32;
        for oy in -half_t..=half_t {
            for ox in -half_t..=half_t {
                let px = cx + ox;
                let py = cy + oy;
                if px >= 0 && px < w && py >= 0 && py < h {
                    img.put_pixel(px as u32, py as u32, Rgba(color));
                }
            }
        }
    }
}

/// Encode RGBA pixels as JPEG at the given quality, dropping alpha.
pub fn encode_jpeg(img: &RgbaImage, quality: u8) -> CaptureResult<Vec<u8>> {
    let rgb: RgbImage = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([p[0], p[1], p[2]])
    });

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| CaptureError::SurfaceLost(format!("jpeg encode failed: {}", e)))?;
    Ok(bytes)
}
