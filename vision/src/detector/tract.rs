use image::imageops::{self, FilterType};
use image::RgbImage;
use sentinel_common::config::DetectorConfig;
use tract_onnx::prelude::tract_ndarray::ArrayViewD;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use super::{
    non_max_suppression, ClassNames, DetectError, DetectionAdapter, RawBox, RawDetection,
};

/// YOLOv8 ONNX model run on the CPU with tract.
///
/// The frame is stretched to the model input, so reported boxes are scaled
/// back per axis into the frame the caller passed in.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence: f32,
    iou: f32,
    names: ClassNames,
}

impl TractDetector {
    pub fn from_config(config: &DetectorConfig, names: ClassNames) -> Result<Self, DetectError> {
        let path = config
            .model_path
            .as_deref()
            .ok_or_else(|| DetectError::Load("detector.model_path is required for tract".into()))?;
        let (width, height) = (config.input_width, config.input_height);

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| DetectError::Load(format!("{path}: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(|e| DetectError::Load(e.to_string()))?
            .into_optimized()
            .map_err(|e| DetectError::Load(e.to_string()))?
            .into_runnable()
            .map_err(|e| DetectError::Load(e.to_string()))?;

        info!(path, width, height, "loaded ONNX model");
        Ok(Self {
            model,
            input_width: width,
            input_height: height,
            confidence: config.confidence,
            iou: config.iou,
            names,
        })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let (width, height) = (self.input_width, self.input_height);
        let resized = imageops::resize(frame, width, height, FilterType::Triangle);
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }
}

/// Decode a YOLOv8 output of layout `[1, 4 + classes, anchors]`: cx, cy, w, h
/// followed by one score per class. Each anchor keeps its best class; boxes
/// under `confidence` are dropped, the rest are scaled per axis into frame
/// coordinates and passed through per-class NMS.
pub fn decode_output(
    view: ArrayViewD<'_, f32>,
    confidence: f32,
    iou: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<RawDetection>, DetectError> {
    let shape = view.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectError::Inference(format!("unexpected output shape {shape:?}")));
    }
    let (rows, anchors) = (shape[1], shape[2]);

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, view[[0, row, anchor]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence {
            continue;
        }

        let cx = view[[0, 0, anchor]];
        let cy = view[[0, 1, anchor]];
        let w = view[[0, 2, anchor]];
        let h = view[[0, 3, anchor]];
        detections.push(RawDetection {
            class_id: class_id as u32,
            confidence: score,
            bbox: RawBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
            },
        });
    }

    non_max_suppression(&mut detections, iou);
    Ok(detections)
}

impl DetectionAdapter for TractDetector {
    fn name(&self) -> &str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::Input("empty frame".into()));
        }
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;

        let scale_x = frame.width() as f32 / self.input_width as f32;
        let scale_y = frame.height() as f32 / self.input_height as f32;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(format!("output tensor was not f32: {e}")))?;
        let detections = decode_output(view, self.confidence, self.iou, scale_x, scale_y)?;
        debug!(count = detections.len(), "tract inference");
        Ok(detections)
    }

    fn class_name(&self, class_id: u32) -> Option<&str> {
        self.names.get(class_id)
    }
}
