use sentinel_common::{Frame, FrameError};
use std::sync::Arc;

use crate::annotate::Annotator;
use crate::detector::{DetectError, DetectionAdapter};
use crate::editor::ZoneView;
use crate::result::BroadcastResult;
use crate::transform::{FrameTransformer, Transformed};
use crate::zone::ZoneEvaluator;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("detection adapter failed: {0}")]
    AdapterFailure(#[from] DetectError),
    #[error("failed to encode annotated frame: {0}")]
    Encode(#[from] FrameError),
}

/// One frame in, one broadcastable result out: detect, draw the zone, judge
/// intrusions, then compress.
pub struct Pipeline {
    transformer: FrameTransformer,
    evaluator: ZoneEvaluator,
    annotator: Arc<Annotator>,
    jpeg_quality: u8,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn DetectionAdapter>,
        processing_width: u32,
        person_class_id: u32,
        annotator: Arc<Annotator>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            transformer: FrameTransformer::new(detector, processing_width, Arc::clone(&annotator)),
            evaluator: ZoneEvaluator::new(person_class_id),
            annotator,
            jpeg_quality,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.transformer.detector_name()
    }

    pub fn run_once(
        &mut self,
        frame: Frame,
        zone: &ZoneView,
    ) -> Result<BroadcastResult, PipelineError> {
        let Transformed {
            mut frame,
            detections,
        } = self.transformer.process(frame)?;

        self.annotator.draw_zone(&mut frame.image, zone);
        let evaluation = self.evaluator.evaluate(detections, zone.active.as_ref());
        self.evaluator.annotate(&mut frame.image, &evaluation, &self.annotator);

        let encoded_image = frame.encode_jpeg(self.jpeg_quality)?;
        Ok(BroadcastResult {
            encoded_image,
            detections: evaluation.detections,
            status: evaluation.status,
            captured_at_ms: frame.captured_at_ms,
            frame_seq: frame.seq,
        })
    }
}
