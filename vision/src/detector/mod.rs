//! Object detection backends.
//!
//! A backend receives the already-resized frame and reports boxes in that
//! frame's coordinate space; mapping back to source resolution is the
//! transformer's job.

#[cfg(feature = "backend-tract")]
pub mod tract;

use image::RgbImage;
use sentinel_common::config::DetectorConfig;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("detector backend {0} is not available in this build")]
    UnsupportedBackend(String),
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid input: {0}")]
    Input(String),
}

/// Box corners in resized-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RawBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &RawBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: RawBox,
}

/// Synchronous, potentially slow detector call. Implementations are driven
/// from a blocking thread, one frame at a time.
pub trait DetectionAdapter: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>, DetectError>;

    fn class_name(&self, class_id: u32) -> Option<&str>;
}

/// Label set indexed by class id.
#[derive(Debug, Clone)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn coco() -> Self {
        Self(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    pub fn get(&self, class_id: u32) -> Option<&str> {
        self.0.get(class_id as usize).map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Reports nothing. Lets the rest of the pipeline run without a model.
pub struct StubDetector {
    names: ClassNames,
}

impl StubDetector {
    pub fn new(names: ClassNames) -> Self {
        Self { names }
    }
}

impl DetectionAdapter for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<RawDetection>, DetectError> {
        Ok(Vec::new())
    }

    fn class_name(&self, class_id: u32) -> Option<&str> {
        self.names.get(class_id)
    }
}

/// Build the backend named in the configuration.
pub fn from_config(config: &DetectorConfig) -> Result<Box<dyn DetectionAdapter>, DetectError> {
    let names = config
        .class_names
        .clone()
        .map(ClassNames::new)
        .unwrap_or_else(ClassNames::coco);
    let classes = names.len();

    let detector: Box<dyn DetectionAdapter> = match config.backend.as_str() {
        "stub" => Box::new(StubDetector::new(names)),
        #[cfg(feature = "backend-tract")]
        "tract" => Box::new(tract::TractDetector::from_config(config, names)?),
        other => return Err(DetectError::UnsupportedBackend(other.to_string())),
    };
    info!(backend = detector.name(), classes, "detector ready");
    Ok(detector)
}

/// Greedy IoU suppression: keeps the highest-confidence box of each
/// overlapping cluster, per class.
pub fn non_max_suppression(detections: &mut Vec<RawDetection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = detections[..kept].iter().any(|prev| {
            prev.class_id == detections[index].class_id
                && prev.bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
