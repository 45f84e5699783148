use image::imageops::{self, FilterType};
use sentinel_common::Frame;
use std::sync::Arc;
use tracing::debug;

use crate::annotate::{Annotator, NORMAL_COLOR};
use crate::detector::{DetectError, DetectionAdapter, RawDetection};
use crate::geometry::BoundingBox;

/// A detection mapped back into source-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledDetection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// `"{class_name} {confidence:.2}"`, as drawn on the frame.
    pub label: String,
}

impl ScaledDetection {
    /// `ratio` is processing width over source width. Coordinates are
    /// truncated toward zero, not rounded.
    pub fn from_raw(raw: &RawDetection, ratio: f64, class_name: &str) -> Self {
        let unscale = |v: f32| (v as f64 / ratio) as i32;
        Self {
            class_id: raw.class_id,
            class_name: class_name.to_string(),
            confidence: raw.confidence,
            bbox: BoundingBox::new(
                unscale(raw.bbox.x1),
                unscale(raw.bbox.y1),
                unscale(raw.bbox.x2),
                unscale(raw.bbox.y2),
            ),
            label: format!("{} {:.2}", class_name, raw.confidence),
        }
    }
}

/// Output of one transform pass. `frame` is the source-resolution frame with
/// every detection drawn in the normal color.
pub struct Transformed {
    pub frame: Frame,
    pub detections: Vec<ScaledDetection>,
}

/// Downscales frames for the detector and maps its boxes back to the
/// source frame.
pub struct FrameTransformer {
    detector: Box<dyn DetectionAdapter>,
    processing_width: u32,
    annotator: Arc<Annotator>,
}

impl FrameTransformer {
    pub fn new(
        detector: Box<dyn DetectionAdapter>,
        processing_width: u32,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            detector,
            processing_width,
            annotator,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn process(&mut self, mut frame: Frame) -> Result<Transformed, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::Input(format!(
                "frame {} has zero size",
                frame.seq
            )));
        }

        let ratio = self.processing_width as f64 / frame.width() as f64;
        let height = ((frame.height() as f64 * ratio).round() as u32).max(1);
        let resized =
            imageops::resize(&frame.image, self.processing_width, height, FilterType::Triangle);

        let raw = self.detector.detect(&resized)?;
        let detections: Vec<ScaledDetection> = raw
            .iter()
            .map(|det| {
                let name = match self.detector.class_name(det.class_id) {
                    Some(name) => name.to_string(),
                    None => format!("class {}", det.class_id),
                };
                ScaledDetection::from_raw(det, ratio, &name)
            })
            .collect();

        for det in &detections {
            self.annotator.draw_detection(&mut frame.image, det, NORMAL_COLOR);
        }
        debug!(
            seq = frame.seq,
            ratio,
            detections = detections.len(),
            "frame transformed"
        );
        Ok(Transformed { frame, detections })
    }
}
