use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::zone::{FrameStatus, JudgedDetection};

/// One fully processed frame, ready to hand to observers.
#[derive(Debug, Clone)]
pub struct BroadcastResult {
    pub encoded_image: Vec<u8>,
    pub detections: Vec<JudgedDetection>,
    pub status: FrameStatus,
    pub captured_at_ms: i64,
    /// Sequence number of the source frame.
    pub frame_seq: u64,
}

/// Text message sent to every observer.
#[derive(Debug, Serialize)]
pub struct ObserverMessage<'a> {
    pub image: String,
    pub detections: Vec<DetectionRecord<'a>>,
    pub status: FrameStatus,
    pub seq: u64,
    pub captured_at_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct DetectionRecord<'a> {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub label: &'a str,
    pub intrusion: bool,
}

impl BroadcastResult {
    /// `seq` is the publish sequence assigned by the result store.
    pub fn to_message(&self, seq: u64) -> ObserverMessage<'_> {
        ObserverMessage {
            image: STANDARD.encode(&self.encoded_image),
            detections: self
                .detections
                .iter()
                .map(|judged| {
                    let det = &judged.detection;
                    DetectionRecord {
                        x1: det.bbox.x1,
                        y1: det.bbox.y1,
                        x2: det.bbox.x2,
                        y2: det.bbox.y2,
                        confidence: det.confidence,
                        label: &det.class_name,
                        intrusion: judged.is_intrusion,
                    }
                })
                .collect(),
            status: self.status,
            seq,
            captured_at_ms: self.captured_at_ms,
        }
    }

    pub fn to_json(&self, seq: u64) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_message(seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::transform::ScaledDetection;

    #[test]
    fn message_shape() {
        let result = BroadcastResult {
            encoded_image: vec![0xff, 0xd8, 0xff],
            detections: vec![JudgedDetection {
                detection: ScaledDetection {
                    class_id: 0,
                    class_name: "person".into(),
                    confidence: 0.5,
                    bbox: BoundingBox::new(1, 2, 3, 4),
                    label: "person 0.50".into(),
                },
                is_intrusion: true,
            }],
            status: FrameStatus::Intrusion,
            captured_at_ms: 1_700_000_000_000,
            frame_seq: 9,
        };

        let json: serde_json::Value = serde_json::from_str(&result.to_json(42).unwrap()).unwrap();
        assert_eq!(json["image"], "/9j/");
        assert_eq!(json["status"], "INTRUSION");
        assert_eq!(json["seq"], 42);
        assert_eq!(json["captured_at_ms"], 1_700_000_000_000i64);
        let det = &json["detections"][0];
        assert_eq!(det["x1"], 1);
        assert_eq!(det["y2"], 4);
        assert_eq!(det["confidence"], 0.5);
        assert_eq!(det["label"], "person");
        assert_eq!(det["intrusion"], true);
    }

    #[test]
    fn empty_detections_serialize_as_empty_list() {
        let result = BroadcastResult {
            encoded_image: Vec::new(),
            detections: Vec::new(),
            status: FrameStatus::Ok,
            captured_at_ms: 0,
            frame_seq: 0,
        };
        let json: serde_json::Value = serde_json::from_str(&result.to_json(1).unwrap()).unwrap();
        assert_eq!(json["detections"], serde_json::json!([]));
        assert_eq!(json["status"], "ok");
    }
}
