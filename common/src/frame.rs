use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbImage};
use std::io::Cursor;

/// A decoded camera frame.
///
/// Frames move by value between pipeline stages; a stage that hands a frame
/// forward keeps no reference to it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Unix millis at which the frame was read from the source.
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Decode a JPEG (or any format `image` can sniff) into an RGB frame.
    pub fn decode(data: &[u8], captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        let image = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .to_rgb8();
        Ok(Self::new(image, captured_at_ms, seq))
    }

    /// Compress the frame to JPEG at the given quality (1..=100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity((self.width() * self.height()) as usize / 4);
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&self.image)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame payload")]
    Empty,
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}
