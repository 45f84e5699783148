//! Per-frame processing: detection, coordinate scaling, zone testing,
//! annotation and the broadcastable result.

pub mod annotate;
pub mod detector;
pub mod editor;
pub mod geometry;
pub mod pipeline;
pub mod result;
pub mod transform;
pub mod zone;

pub use annotate::Annotator;
pub use detector::{DetectError, DetectionAdapter, RawDetection};
pub use editor::{ZoneEditError, ZoneEditorState, ZoneEvent, ZoneView};
pub use pipeline::{Pipeline, PipelineError};
pub use result::BroadcastResult;
pub use transform::{FrameTransformer, ScaledDetection};
pub use zone::{FrameStatus, ZoneDefinition, ZoneEvaluator};
