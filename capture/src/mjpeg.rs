use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use sentinel_common::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::source::{Capture, FrameStream};
use crate::{http_client, CaptureError};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental `multipart/x-mixed-replace` splitter. Feed it chunks as they
/// arrive; boundaries may straddle chunks.
pub struct MultipartParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: format!("--{}\r\n", boundary.trim_start_matches("--")).into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete part body, if the buffer holds one.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        let marker_len = self.boundary.len();
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + marker_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > marker_len {
                            let _ = self.buffer.split_to(self.buffer.len() - marker_len);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        // Avoid re-scanning what was already searched
                        self.jpeg_start = self.buffer.len().saturating_sub(marker_len);
                        return None;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let part = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + marker_len);
                    self.state = ParseState::SeekingHeaderEnd;
                    self.jpeg_start = 0;
                    if !part.is_empty() {
                        return Some(part);
                    }
                }
            }
        }
    }
}

/// Extract the boundary parameter from a multipart `Content-Type` header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// HTTP MJPEG camera (`multipart/x-mixed-replace`).
pub struct MjpegCapture {
    client: reqwest::Client,
}

impl MjpegCapture {
    pub fn new(connect_timeout: Duration) -> Result<Self, CaptureError> {
        Ok(Self {
            client: http_client(connect_timeout)?,
        })
    }
}

impl Capture for MjpegCapture {
    type Stream = MjpegStream;

    async fn open(&mut self, url: &str) -> Result<MjpegStream, CaptureError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CaptureError::SourceUnavailable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        info!(status = %response.status(), boundary = %boundary, "connected to MJPEG stream");

        Ok(MjpegStream {
            body: response.bytes_stream().boxed(),
            parser: MultipartParser::new(&boundary),
        })
    }
}

pub struct MjpegStream {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: MultipartParser,
}

impl FrameStream for MjpegStream {
    async fn read_next(&mut self) -> Result<Frame, CaptureError> {
        loop {
            while let Some(jpeg) = self.parser.next_part() {
                let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
                match decode_off_thread(jpeg, seq).await {
                    Ok(frame) => return Ok(frame),
                    Err(e) => debug!(seq, error = %e, "skipping undecodable MJPEG part"),
                }
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => return Err(CaptureError::ReadFailure(e.to_string())),
                None => return Err(CaptureError::ReadFailure("MJPEG stream ended".into())),
            }
        }
    }
}

/// JPEG decoding is CPU-bound; keep it off the async workers.
pub(crate) async fn decode_off_thread(
    data: Vec<u8>,
    seq: u64,
) -> Result<Frame, sentinel_common::FrameError> {
    let captured_at_ms = Utc::now().timestamp_millis();
    tokio::task::spawn_blocking(move || Frame::decode(&data, captured_at_ms, seq))
        .await
        .map_err(|e| sentinel_common::FrameError::Decode(e.to_string()))?
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn splits_parts_in_one_chunk() {
        let mut stream = part(b"AAAA");
        stream.extend(part(b"BBBB"));
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("frame");
        parser.push(&stream);
        assert_eq!(parser.next_part().unwrap(), b"AAAA");
        assert_eq!(parser.next_part().unwrap(), b"BBBB");
        assert!(parser.next_part().is_none());
    }

    #[test]
    fn boundary_split_across_chunks() {
        let mut stream = part(b"first-jpeg");
        stream.extend(part(b"second"));
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("frame");
        let mut parts = Vec::new();
        for chunk in stream.chunks(3) {
            parser.push(chunk);
            while let Some(p) = parser.next_part() {
                parts.push(p);
            }
        }
        assert_eq!(parts, vec![b"first-jpeg".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut stream = b"HTTP preamble junk".to_vec();
        stream.extend(part(b"JPEG"));
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("frame");
        parser.push(&stream);
        assert_eq!(parser.next_part().unwrap(), b"JPEG");
    }

    #[test]
    fn incomplete_part_waits_for_more_data() {
        let mut parser = MultipartParser::new("frame");
        parser.push(b"--frame\r\nContent-Type: image/jpeg\r\n\r\npartial");
        assert!(parser.next_part().is_none());
        parser.push(b"-rest\r\n--frame\r\n");
        assert_eq!(parser.next_part().unwrap(), b"partial-rest");
    }

    #[test]
    fn custom_boundary() {
        let mut parser = MultipartParser::new("--myboundary");
        parser.push(b"--myboundary\r\nContent-Length: 2\r\n\r\nXY\r\n--myboundary\r\n");
        assert_eq!(parser.next_part().unwrap(), b"XY");
    }

    #[test]
    fn boundary_from_header() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame"),
            Some("frame".into())
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"--abc\""),
            Some("--abc".into())
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
    }
}
