//! Frame acquisition: capture backends and the latest-wins acquisition loop.

pub mod mjpeg;
pub mod polling;
pub mod slot;
pub mod source;

use std::time::Duration;

pub use mjpeg::MjpegCapture;
pub use polling::PollingCapture;
pub use slot::FrameSlot;
pub use source::{Capture, FrameSource, FrameStream};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("frame read failed: {0}")]
    ReadFailure(String),
}

fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, CaptureError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))
}
