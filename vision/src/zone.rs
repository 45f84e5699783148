//! Forbidden-zone definitions and the per-frame intrusion test.
//!
//! Each zone shape has exactly one test point per detection:
//! - polygon: the box's bottom-center `((x1 + x2) / 2, y2)`, where a
//!   standing person meets the floor;
//! - rectangle: the box's center `((x1 + x2) / 2, (y1 + y2) / 2)` tested
//!   against both axis intervals.
//!
//! Bounds are inclusive in both cases. A single evaluation only ever uses the
//! active zone's own test.

use image::RgbImage;
use sentinel_common::config::ZoneConfig;
use serde::Serialize;
use tracing::{info, warn};

use crate::annotate::{Annotator, INTRUSION_COLOR};
use crate::geometry::{BoundingBox, Point, Polygon, Rect};
use crate::transform::ScaledDetection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "ZoneConfig")]
pub enum ZoneDefinition {
    Polygon(Polygon),
    Rectangle(Rect),
}

impl ZoneDefinition {
    /// `None` for a polygon that [`Polygon::new`] rejects, which counts as no
    /// zone at all.
    pub fn from_config(config: &ZoneConfig) -> Option<Self> {
        match config {
            ZoneConfig::Rectangle {
                x_min,
                y_min,
                x_max,
                y_max,
            } => Some(Self::Rectangle(Rect::new(*x_min, *y_min, *x_max, *y_max))),
            ZoneConfig::Polygon { points } => {
                let points = points.iter().map(|[x, y]| Point::new(*x, *y)).collect();
                let polygon = Polygon::new(points);
                if polygon.is_none() {
                    warn!("zone polygon is degenerate or out of range, treating zone as undefined");
                }
                polygon.map(Self::Polygon)
            }
        }
    }

    pub fn test_point(&self, bbox: &BoundingBox) -> (f64, f64) {
        match self {
            Self::Polygon(_) => bbox.bottom_center(),
            Self::Rectangle(_) => bbox.center(),
        }
    }

    pub fn contains(&self, bbox: &BoundingBox) -> bool {
        let (x, y) = self.test_point(bbox);
        match self {
            Self::Polygon(polygon) => polygon.contains(x, y),
            Self::Rectangle(rect) => rect.contains(x, y),
        }
    }
}

impl From<ZoneDefinition> for ZoneConfig {
    fn from(zone: ZoneDefinition) -> Self {
        match zone {
            ZoneDefinition::Rectangle(rect) => ZoneConfig::Rectangle {
                x_min: rect.x_min,
                y_min: rect.y_min,
                x_max: rect.x_max,
                y_max: rect.y_max,
            },
            ZoneDefinition::Polygon(polygon) => ZoneConfig::Polygon {
                points: polygon.into_points().into_iter().map(|p| [p.x, p.y]).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "INTRUSION")]
    Intrusion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgedDetection {
    pub detection: ScaledDetection,
    pub is_intrusion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub detections: Vec<JudgedDetection>,
    pub status: FrameStatus,
}

/// Flags person detections inside the zone. Remembers the previous frame's
/// status so only transitions are logged.
pub struct ZoneEvaluator {
    person_class_id: u32,
    last_status: FrameStatus,
    intrusion_frames: u64,
}

impl ZoneEvaluator {
    pub fn new(person_class_id: u32) -> Self {
        Self {
            person_class_id,
            last_status: FrameStatus::Ok,
            intrusion_frames: 0,
        }
    }

    pub fn evaluate(
        &mut self,
        detections: Vec<ScaledDetection>,
        zone: Option<&ZoneDefinition>,
    ) -> Evaluation {
        let detections: Vec<JudgedDetection> = detections
            .into_iter()
            .map(|detection| {
                let is_intrusion = match zone {
                    Some(zone) => {
                        detection.class_id == self.person_class_id
                            && zone.contains(&detection.bbox)
                    }
                    None => false,
                };
                JudgedDetection {
                    detection,
                    is_intrusion,
                }
            })
            .collect();

        let status = if detections.iter().any(|d| d.is_intrusion) {
            FrameStatus::Intrusion
        } else {
            FrameStatus::Ok
        };

        if status == FrameStatus::Intrusion {
            self.intrusion_frames += 1;
        }
        if status != self.last_status {
            match status {
                FrameStatus::Intrusion => warn!(
                    intruders = detections.iter().filter(|d| d.is_intrusion).count(),
                    "intrusion detected"
                ),
                FrameStatus::Ok => {
                    info!(frames = self.intrusion_frames, "intrusion cleared");
                    self.intrusion_frames = 0;
                }
            }
            self.last_status = status;
        }

        Evaluation { detections, status }
    }

    /// Redraw intruding boxes in the intrusion color and raise the banner.
    pub fn annotate(&self, image: &mut RgbImage, evaluation: &Evaluation, annotator: &Annotator) {
        for judged in evaluation.detections.iter().filter(|d| d.is_intrusion) {
            annotator.draw_detection(image, &judged.detection, INTRUSION_COLOR);
        }
        if evaluation.status == FrameStatus::Intrusion {
            annotator.draw_alert(image);
        }
    }
}
