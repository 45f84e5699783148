//! Overlay drawing on source-resolution frames.

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_polygon_mut, draw_text_mut,
};
use imageproc::point::Point as PixelPoint;
use imageproc::rect::Rect as PixelRect;
use std::path::Path;
use tracing::info;

use crate::editor::ZoneView;
use crate::geometry::{Point, Polygon};
use crate::transform::ScaledDetection;
use crate::zone::ZoneDefinition;

pub const NORMAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const INTRUSION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const ZONE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const PENDING_LINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const ALERT_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub const ALERT_TEXT: &str = "INTRUSION ALERT!";
const ALERT_ORIGIN: (i32, i32) = (50, 50);
const ALERT_BANNER_SIZE: (u32, u32) = (300, 44);
const ALERT_SCALE: f32 = 32.0;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10;
const ZONE_FILL_ALPHA: f32 = 0.3;
const PENDING_POINT_RADIUS: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("failed to read font {0}: {1}")]
    ReadFont(String, std::io::Error),
    #[error("invalid font {0}: {1}")]
    InvalidFont(String, ab_glyph::InvalidFont),
}

/// Draws boxes, labels, zone overlays and the intrusion banner. Text is only
/// rendered when a font was loaded.
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_font_path(path: Option<&str>) -> Result<Self, AnnotateError> {
        let Some(path) = path else {
            info!("no font configured, labels will not be rendered");
            return Ok(Self::new(None));
        };
        let bytes = std::fs::read(Path::new(path))
            .map_err(|e| AnnotateError::ReadFont(path.to_string(), e))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| AnnotateError::InvalidFont(path.to_string(), e))?;
        info!(path, "loaded label font");
        Ok(Self::new(Some(font)))
    }

    pub fn draw_detection(&self, image: &mut RgbImage, det: &ScaledDetection, color: Rgb<u8>) {
        let bbox = det.bbox;
        for inset in 0..BOX_THICKNESS {
            let Some(rect) = frame_rect(image, bbox.x1, bbox.y1, bbox.x2, bbox.y2, inset) else {
                break;
            };
            draw_hollow_rect_mut(image, rect, color);
        }

        if let Some(font) = &self.font {
            let x = bbox.x1.clamp(0, image.width() as i32);
            let y = bbox
                .y1
                .saturating_sub(LABEL_OFFSET + LABEL_SCALE as i32)
                .clamp(0, image.height() as i32);
            draw_text_mut(image, color, x, y, PxScale::from(LABEL_SCALE), font, &det.label);
        }
    }

    /// Active zone as a translucent fill with an outline, plus any points
    /// placed for the next zone.
    pub fn draw_zone(&self, image: &mut RgbImage, view: &ZoneView) {
        match &view.active {
            Some(ZoneDefinition::Polygon(polygon)) => draw_polygon_zone(image, polygon),
            Some(ZoneDefinition::Rectangle(rect)) => {
                if let Some(pixel_rect) =
                    frame_rect(image, rect.x_min, rect.y_min, rect.x_max, rect.y_max, 0)
                {
                    blend(image, ZONE_FILL_ALPHA, |overlay| {
                        draw_filled_rect_mut(overlay, pixel_rect, ZONE_COLOR)
                    });
                    draw_hollow_rect_mut(image, pixel_rect, ZONE_COLOR);
                }
            }
            None => {}
        }
        self.draw_pending(image, &view.pending);
    }

    fn draw_pending(&self, image: &mut RgbImage, points: &[Point]) {
        for pair in points.windows(2) {
            draw_line_segment_mut(image, to_f32(pair[0]), to_f32(pair[1]), PENDING_LINE_COLOR);
        }
        for point in points {
            draw_filled_circle_mut(image, (point.x, point.y), PENDING_POINT_RADIUS, ZONE_COLOR);
        }
    }

    pub fn draw_alert(&self, image: &mut RgbImage) {
        let (x, y) = ALERT_ORIGIN;
        let (w, h) = ALERT_BANNER_SIZE;
        draw_filled_rect_mut(image, PixelRect::at(x, y).of_size(w, h), INTRUSION_COLOR);
        if let Some(font) = &self.font {
            let scale = PxScale::from(ALERT_SCALE);
            draw_text_mut(image, ALERT_TEXT_COLOR, x + 8, y + 6, scale, font, ALERT_TEXT);
        }
    }
}

fn draw_polygon_zone(image: &mut RgbImage, polygon: &Polygon) {
    let vertices: Vec<PixelPoint<i32>> = polygon
        .points()
        .iter()
        .map(|p| PixelPoint::new(p.x, p.y))
        .collect();
    blend(image, ZONE_FILL_ALPHA, |overlay| {
        draw_polygon_mut(overlay, &vertices, ZONE_COLOR)
    });
    for (a, b) in polygon.edges() {
        draw_line_segment_mut(image, to_f32(a), to_f32(b), ZONE_COLOR);
    }
}

/// Inclusive bounds shrunk by `inset` on every side, as a drawable rect.
///
/// Bounds are clamped to a margin just outside the frame, so edges that lie
/// beyond it stay invisible while the size always fits. `None` once the inset
/// leaves nothing to draw.
fn frame_rect(
    image: &RgbImage,
    x_min: i32,
    y_min: i32,
    x_max: i32,
    y_max: i32,
    inset: i32,
) -> Option<PixelRect> {
    let margin = BOX_THICKNESS as i64;
    let clamp_x = |v: i32| (v as i64).clamp(-margin, image.width() as i64 + margin);
    let clamp_y = |v: i32| (v as i64).clamp(-margin, image.height() as i64 + margin);
    let inset = inset as i64;

    let (left, top) = (clamp_x(x_min) + inset, clamp_y(y_min) + inset);
    let (right, bottom) = (clamp_x(x_max) - inset, clamp_y(y_max) - inset);
    if right < left || bottom < top {
        return None;
    }
    let size = ((right - left + 1) as u32, (bottom - top + 1) as u32);
    Some(PixelRect::at(left as i32, top as i32).of_size(size.0, size.1))
}

/// Draw onto a copy and mix it back in at `alpha`. Pixels the closure does not
/// touch come out unchanged.
fn blend(image: &mut RgbImage, alpha: f32, draw: impl FnOnce(&mut RgbImage)) {
    let mut overlay = image.clone();
    draw(&mut overlay);
    for (dst, src) in image.pixels_mut().zip(overlay.pixels()) {
        if *dst == *src {
            continue;
        }
        for c in 0..3 {
            let mixed = src.0[c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha);
            dst.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn to_f32(p: Point) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}
