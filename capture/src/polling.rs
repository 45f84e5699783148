use sentinel_common::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::mjpeg::decode_off_thread;
use crate::source::{Capture, FrameStream};
use crate::{http_client, CaptureError};

static POLL_SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Polling-based fallback for cameras that only serve single JPEG snapshots.
pub struct PollingCapture {
    client: reqwest::Client,
    interval: Duration,
}

impl PollingCapture {
    pub fn new(connect_timeout: Duration, fps: f64) -> Result<Self, CaptureError> {
        Ok(Self {
            client: http_client(connect_timeout)?,
            interval: Duration::from_secs_f64(1.0 / fps),
        })
    }
}

impl Capture for PollingCapture {
    type Stream = PollingStream;

    /// Fetches one snapshot so an unreachable camera fails at open time.
    async fn open(&mut self, url: &str) -> Result<PollingStream, CaptureError> {
        let jpeg = fetch_snapshot(&self.client, url)
            .await
            .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))?;
        let seq = POLL_SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        let first = decode_off_thread(jpeg, seq)
            .await
            .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))?;
        info!(url, interval = ?self.interval, "polling camera snapshots");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(PollingStream {
            client: self.client.clone(),
            url: url.to_string(),
            ticker,
            pending: Some(first),
        })
    }
}

pub struct PollingStream {
    client: reqwest::Client,
    url: String,
    ticker: Interval,
    pending: Option<Frame>,
}

impl FrameStream for PollingStream {
    async fn read_next(&mut self) -> Result<Frame, CaptureError> {
        // The first tick completes immediately and stands for the snapshot
        // already fetched by `open`.
        loop {
            self.ticker.tick().await;
            if let Some(frame) = self.pending.take() {
                return Ok(frame);
            }
            let jpeg = fetch_snapshot(&self.client, &self.url).await?;
            let seq = POLL_SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
            match decode_off_thread(jpeg, seq).await {
                Ok(frame) => return Ok(frame),
                Err(e) => debug!(seq, error = %e, "skipping undecodable snapshot"),
            }
        }
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, CaptureError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| CaptureError::ReadFailure(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(CaptureError::ReadFailure(format!(
            "HTTP status {}",
            resp.status().as_u16()
        )));
    }
    let jpeg = resp
        .bytes()
        .await
        .map_err(|e| CaptureError::ReadFailure(e.to_string()))?;
    Ok(jpeg.to_vec())
}
