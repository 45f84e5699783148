use sentinel_capture::FrameSlot;
use sentinel_common::{StopSignal, TaskHandle};
use sentinel_vision::{Pipeline, PipelineError, ZoneView};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::store::LatestResultStore;

/// Takes the newest frame, runs one pipeline pass on a blocking thread and
/// publishes the result. Passes never overlap. A pass that fails, panics
/// included, is logged and the previous result stays published.
pub struct PipelineLoop {
    pipeline: Pipeline,
    frames: Arc<FrameSlot>,
    zone: watch::Receiver<ZoneView>,
    store: LatestResultStore,
}

impl PipelineLoop {
    pub fn new(
        pipeline: Pipeline,
        frames: Arc<FrameSlot>,
        zone: watch::Receiver<ZoneView>,
        store: LatestResultStore,
    ) -> Self {
        Self {
            pipeline,
            frames,
            zone,
            store,
        }
    }

    pub fn start(self) -> TaskHandle {
        TaskHandle::spawn("pipeline", move |stop| self.run(stop))
    }

    async fn run(self, mut stop: StopSignal) {
        let Self {
            mut pipeline,
            frames,
            zone,
            store,
        } = self;
        info!(detector = pipeline.detector_name(), "pipeline loop started");

        let mut processed: u64 = 0;
        let mut failed: u64 = 0;
        loop {
            let frame = tokio::select! {
                _ = stop.stopped() => break,
                frame = frames.take() => frame,
            };
            let frame_seq = frame.seq;
            let view = zone.borrow().clone();

            let pass = tokio::task::spawn_blocking(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| pipeline.run_once(frame, &view)));
                (pipeline, outcome)
            })
            .await;

            let outcome = match pass {
                Ok((returned, Ok(outcome))) => {
                    pipeline = returned;
                    outcome
                }
                Ok((returned, Err(_))) => {
                    pipeline = returned;
                    failed += 1;
                    error!(frame_seq, "pipeline pass panicked, keeping previous result");
                    continue;
                }
                Err(e) => {
                    // Only reachable if the blocking pool itself is shutting down
                    error!(frame_seq, error = %e, "pipeline pass lost, stopping pipeline loop");
                    return;
                }
            };

            match outcome {
                Ok(result) => {
                    let status = result.status;
                    let seq = store.publish(result);
                    processed += 1;
                    debug!(frame_seq, seq, ?status, "result published");
                    if processed % 100 == 0 {
                        info!(processed, failed, dropped = frames.dropped(), "pipeline progress");
                    }
                }
                Err(PipelineError::AdapterFailure(e)) => {
                    failed += 1;
                    warn!(frame_seq, error = %e, "detection failed, keeping previous result");
                }
                Err(e) => {
                    failed += 1;
                    warn!(frame_seq, error = %e, "pipeline pass failed");
                }
            }
        }
        info!(processed, failed, "pipeline loop stopped");
    }
}
