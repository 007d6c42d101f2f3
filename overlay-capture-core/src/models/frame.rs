use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Largest width or height accepted for any pixel buffer.
pub const MAX_DIMENSION: u32 = 16384;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of a tightly packed buffer of this size, or `None` on overflow.
    pub fn byte_len(&self, format: PixelFormat) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(format.bytes_per_pixel())
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Channel ordering of a 4-component pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// Storage type of a single pixel component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    UnsignedByte,
}

/// An owned, immutable block of pixel data.
///
/// Once constructed the data is never mutated, so a buffer can be shared
/// between lanes behind an `Arc` without further locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    size: FrameSize,
    format: PixelFormat,
    pixel_type: PixelType,
    has_data: bool,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer. The result reports `has_data() == false`.
    pub fn allocate(size: FrameSize, format: PixelFormat) -> Result<Self, CaptureError> {
        let data = allocate_zeroed(size, format)?;
        Ok(Self {
            data,
            size,
            format,
            pixel_type: PixelType::UnsignedByte,
            has_data: false,
        })
    }

    /// Wrap existing pixel data. The length must match `size` exactly.
    pub fn from_data(size: FrameSize, format: PixelFormat, data: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = size
            .byte_len(format)
            .ok_or_else(|| CaptureError::AllocationFailed(format!("frame size {} overflows", size)))?;
        if data.len() != expected {
            return Err(CaptureError::AllocationFailed(format!(
                "pixel data is {} bytes, {} {:?} needs {}",
                data.len(),
                size,
                format,
                expected
            )));
        }
        Ok(Self {
            data,
            size,
            format,
            pixel_type: PixelType::UnsignedByte,
            has_data: true,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Whether the buffer holds rendered content rather than the initial blank allocation.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }

    /// Copy of this buffer with components reordered into `format`.
    pub fn converted(&self, format: PixelFormat) -> PixelBuffer {
        if format == self.format {
            return self.clone();
        }
        let mut data = self.data.clone();
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        PixelBuffer {
            data,
            size: self.size,
            format,
            pixel_type: self.pixel_type,
            has_data: self.has_data,
        }
    }
}

/// Allocate a zero-filled pixel store, reporting failure instead of aborting.
pub(crate) fn allocate_zeroed(size: FrameSize, format: PixelFormat) -> Result<Vec<u8>, CaptureError> {
    if size.is_empty() {
        return Err(CaptureError::AllocationFailed(format!("frame size {} is empty", size)));
    }
    if size.width > MAX_DIMENSION || size.height > MAX_DIMENSION {
        return Err(CaptureError::AllocationFailed(format!(
            "frame size {} exceeds {} pixels per side",
            size, MAX_DIMENSION
        )));
    }
    let len = size
        .byte_len(format)
        .ok_or_else(|| CaptureError::AllocationFailed(format!("frame size {} overflows", size)))?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| CaptureError::AllocationFailed(format!("cannot reserve {} bytes: {}", len, e)))?;
    data.resize(len, 0);
    Ok(data)
}

/// A pixel buffer stamped with its presentation time.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    buffer: Arc<PixelBuffer>,
    time: Duration,
}

impl VideoFrame {
    pub fn new(buffer: PixelBuffer, time: Duration) -> Self {
        Self {
            buffer: Arc::new(buffer),
            time,
        }
    }

    pub fn from_shared(buffer: Arc<PixelBuffer>, time: Duration) -> Self {
        Self { buffer, time }
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn shared_buffer(&self) -> Arc<PixelBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn size(&self) -> FrameSize {
        self.buffer.size()
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    /// Same pixels, different presentation time.
    pub fn retimed(&self, time: Duration) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            time,
        }
    }
}

/// A standalone RGBA copy of a composited frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub size: FrameSize,
    pub rgba: Vec<u8>,
    pub time: Duration,
}

impl StillImage {
    pub fn from_frame(frame: &VideoFrame) -> Self {
        let rgba = frame.buffer().converted(PixelFormat::Rgba).into_data();
        Self {
            size: frame.size(),
            rgba,
            time: frame.time(),
        }
    }

    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.size.width, self.size.height, self.rgba.clone())
    }

    /// Encode as PNG at `path`.
    pub fn save_png(&self, path: &Path) -> Result<(), CaptureError> {
        let image = self
            .to_rgba_image()
            .ok_or_else(|| CaptureError::StorageError("still image data does not match its size".into()))?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| CaptureError::StorageError(format!("failed to save still image: {}", e)))
    }
}
