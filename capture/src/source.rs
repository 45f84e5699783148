use sentinel_common::{Frame, StopSignal, TaskHandle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::slot::FrameSlot;
use crate::CaptureError;

/// A capture backend that can (re)open a source by identifier.
pub trait Capture: Send + 'static {
    type Stream: FrameStream;

    fn open(
        &mut self,
        source: &str,
    ) -> impl Future<Output = Result<Self::Stream, CaptureError>> + Send;
}

/// An open capture handle. Dropping it releases the underlying device or
/// connection.
pub trait FrameStream: Send + 'static {
    fn read_next(&mut self) -> impl Future<Output = Result<Frame, CaptureError>> + Send;
}

enum PumpEnd {
    Stopped,
    Failed,
}

/// Acquisition loop: reads frames at the device's pace into a [`FrameSlot`],
/// reconnecting after a fixed backoff whenever open or read fails.
///
/// An open or read that takes longer than `io_timeout` counts as a failure,
/// so a camera that goes silent without closing the connection is reopened.
pub struct FrameSource<C: Capture> {
    capture: C,
    source: String,
    backoff: Duration,
    io_timeout: Duration,
    slot: Arc<FrameSlot>,
}

impl<C: Capture> FrameSource<C> {
    pub fn new(
        capture: C,
        source: impl Into<String>,
        backoff: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            capture,
            source: source.into(),
            backoff,
            io_timeout,
            slot: Arc::new(FrameSlot::new()),
        }
    }

    /// The slot this source writes into.
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn start(self) -> TaskHandle {
        TaskHandle::spawn("frame-source", move |stop| self.run(stop))
    }

    async fn run(mut self, mut stop: StopSignal) {
        loop {
            info!(source = %self.source, "opening capture source");
            let opened = tokio::select! {
                _ = stop.stopped() => break,
                opened = tokio::time::timeout(self.io_timeout, self.capture.open(&self.source)) => {
                    opened.unwrap_or_else(|_| {
                        Err(CaptureError::SourceUnavailable(format!(
                            "no response within {:?}",
                            self.io_timeout
                        )))
                    })
                }
            };

            match opened {
                Ok(stream) => {
                    info!(source = %self.source, "capture source opened");
                    let end =
                        pump(&self.slot, self.backoff, self.io_timeout, stream, &mut stop).await;
                    if let PumpEnd::Stopped = end {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        source = %self.source,
                        "failed to open capture source, retrying in {:?}",
                        self.backoff
                    );
                }
            }

            tokio::select! {
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        info!(source = %self.source, dropped = self.slot.dropped(), "frame source stopped");
    }
}

/// Read until failure or stop. The stream is dropped (and the device
/// released) when this returns.
async fn pump<S: FrameStream>(
    slot: &FrameSlot,
    backoff: Duration,
    read_timeout: Duration,
    mut stream: S,
    stop: &mut StopSignal,
) -> PumpEnd {
    let mut frames: u64 = 0;
    loop {
        let next = tokio::select! {
            _ = stop.stopped() => return PumpEnd::Stopped,
            next = tokio::time::timeout(read_timeout, stream.read_next()) => {
                next.unwrap_or_else(|_| {
                    Err(CaptureError::ReadFailure(format!(
                        "no frame within {read_timeout:?}"
                    )))
                })
            }
        };
        match next {
            Ok(frame) => {
                frames += 1;
                if frames % 100 == 0 {
                    debug!(frames, dropped = slot.dropped(), "frames acquired");
                }
                slot.put(frame);
            }
            Err(e) => {
                warn!(error = %e, frames, "capture read failed, reconnecting in {:?}", backoff);
                return PumpEnd::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    const BACKOFF: Duration = Duration::from_secs(5);
    const IO_TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Clone, Copy)]
    enum Step {
        Frame,
        Fail,
    }

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        released: AtomicUsize,
    }

    /// Each entry is one `open` attempt: `None` fails to open, `Some(steps)`
    /// yields a stream that plays the steps and then stalls.
    struct ScriptedCapture {
        attempts: VecDeque<Option<Vec<Step>>>,
        counters: Arc<Counters>,
    }

    struct ScriptedStream {
        steps: VecDeque<Step>,
        counters: Arc<Counters>,
        seq: u64,
    }

    impl Capture for ScriptedCapture {
        type Stream = ScriptedStream;

        async fn open(&mut self, _source: &str) -> Result<ScriptedStream, CaptureError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            match self.attempts.pop_front().flatten() {
                Some(steps) => Ok(ScriptedStream {
                    steps: steps.into(),
                    counters: Arc::clone(&self.counters),
                    seq: 0,
                }),
                None => Err(CaptureError::SourceUnavailable("scripted".into())),
            }
        }
    }

    impl FrameStream for ScriptedStream {
        async fn read_next(&mut self) -> Result<Frame, CaptureError> {
            match self.steps.pop_front() {
                Some(Step::Frame) => {
                    self.seq += 1;
                    Ok(Frame::new(RgbImage::new(4, 4), 0, self.seq))
                }
                Some(Step::Fail) => Err(CaptureError::ReadFailure("scripted".into())),
                None => std::future::pending().await,
            }
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scripted(attempts: Vec<Option<Vec<Step>>>) -> (ScriptedCapture, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let capture = ScriptedCapture {
            attempts: attempts.into(),
            counters: Arc::clone(&counters),
        };
        (capture, counters)
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_reconnects_after_one_backoff() {
        let (capture, counters) = scripted(vec![
            Some(vec![Step::Frame, Step::Fail]),
            Some(vec![Step::Frame, Step::Frame]),
        ]);
        let source = FrameSource::new(capture, "scripted://cam", BACKOFF, IO_TIMEOUT);
        let slot = source.slot();
        let start = Instant::now();
        let mut handle = source.start();

        let first = slot.take().await;
        assert_eq!(first.seq, 1);

        let resumed = slot.take().await;
        assert!(resumed.seq >= 1);
        let waited = start.elapsed();
        assert!(waited >= BACKOFF, "waited {waited:?}");
        assert!(waited < BACKOFF * 2, "waited {waited:?}");
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);

        handle.stop().await;
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out_and_reconnects() {
        let (capture, counters) = scripted(vec![Some(vec![Step::Frame]), Some(vec![Step::Frame])]);
        let source = FrameSource::new(capture, "scripted://cam", BACKOFF, IO_TIMEOUT);
        let slot = source.slot();
        let start = Instant::now();
        let mut handle = source.start();

        slot.take().await;
        // The first stream now never yields; only the timeout gets it reopened
        slot.take().await;
        let waited = start.elapsed();
        assert!(waited >= IO_TIMEOUT + BACKOFF, "waited {waited:?}");
        assert!(waited < IO_TIMEOUT * 2 + BACKOFF, "waited {waited:?}");
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);

        handle.stop().await;
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_retried() {
        let (capture, counters) = scripted(vec![None, None, Some(vec![Step::Frame])]);
        let source = FrameSource::new(capture, "scripted://cam", BACKOFF, IO_TIMEOUT);
        let slot = source.slot();
        let start = Instant::now();
        let mut handle = source.start();

        let frame = slot.take().await;
        assert_eq!(frame.seq, 1);
        assert!(start.elapsed() >= BACKOFF * 2);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 3);

        handle.stop().await;
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_does_not_reopen() {
        let (capture, counters) = scripted(vec![None, Some(vec![Step::Frame])]);
        let source = FrameSource::new(capture, "scripted://cam", BACKOFF, IO_TIMEOUT);
        let mut handle = source.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop().await;
        handle.stop().await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_open_stream_once() {
        let (capture, counters) = scripted(vec![Some(vec![Step::Frame])]);
        let source = FrameSource::new(capture, "scripted://cam", BACKOFF, IO_TIMEOUT);
        let slot = source.slot();
        let mut handle = source.start();

        slot.take().await;
        handle.stop().await;
        handle.stop().await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }
}
