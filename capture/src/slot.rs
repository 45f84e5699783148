use parking_lot::Mutex;
use sentinel_common::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Single-frame handoff between the acquisition loop and the pipeline.
///
/// `put` overwrites whatever frame is still waiting; `take` moves the newest
/// frame out. Nothing is queued.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    ready: Notify,
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, frame: Frame) {
        let superseded = self.latest.lock().replace(frame);
        if superseded.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
    }

    pub fn try_take(&self) -> Option<Frame> {
        self.latest.lock().take()
    }

    /// Wait for a frame and take ownership of it.
    pub async fn take(&self) -> Frame {
        loop {
            if let Some(frame) = self.try_take() {
                return frame;
            }
            self.ready.notified().await;
        }
    }

    /// Frames overwritten before anyone took them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
