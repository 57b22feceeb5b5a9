use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Frame format for captured video frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Compressed JPEG payload (opaque bytes, passed through untouched)
    Mjpeg,
    /// Uncompressed RGB, 3 bytes per pixel, row-major
    Rgb24,
}

impl FrameFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// A single captured frame with metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Frame identifier, monotonic per camera
    pub id: u64,
    /// Capture timestamp
    pub timestamp: SystemTime,
    /// Raw frame bytes (shared ownership for cheap fan-out)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Expected byte length for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Frame bytes as JPEG. MJPEG payloads pass through untouched; RGB
    /// frames are encoded at quality 90.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, String> {
        match self.format {
            FrameFormat::Mjpeg => Ok(self.data.as_ref().clone()),
            FrameFormat::Rgb24 => {
                let img = image::RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                    .ok_or_else(|| "frame byte length does not match dimensions".to_string())?;

                let mut buf = Vec::new();
                let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 90);
                encoder
                    .encode_image(&image::DynamicImage::ImageRgb8(img))
                    .map_err(|e| format!("JPEG encode failed: {}", e))?;
                Ok(buf)
            }
        }
    }
}
