//! Segmentation backend seam
//!
//! The runtime never looks inside a model. A [`SegmentationBackend`] turns a
//! model identifier into a loaded [`ModelSession`], and the session turns an
//! input image into a cut-out. Both calls are blocking and are only ever
//! invoked from executor worker threads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Error type reported by backends
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Pixel layout of an [`ImageBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Luma8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Luma8 => write!(f, "L"),
            PixelFormat::Rgb8 => write!(f, "RGB"),
            PixelFormat::Rgba8 => write!(f, "RGBA"),
        }
    }
}

/// Decoded, uncompressed image.
///
/// Encoding and decoding happen outside the runtime; this is the in-memory
/// form passed to and returned from the model. Cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
}

impl ImageBuffer {
    /// Wrap raw pixel data. Returns `None` when `data` does not hold exactly
    /// `width * height * channels` bytes.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Option<Self> {
        let data = data.into();
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.channels())?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A loaded model, ready for inference.
///
/// Sessions are shared through `Arc`; the resource is released when the last
/// reference is dropped.
pub trait ModelSession: Send + Sync {
    /// Remove the background from `image` (blocking).
    fn infer(&self, image: &ImageBuffer) -> BackendResult<ImageBuffer>;
}

/// Factory for model sessions
pub trait SegmentationBackend: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Load `model_id`, using `cache_dir` for downloaded weights (blocking,
    /// expensive).
    fn load(&self, model_id: &str, cache_dir: &Path) -> BackendResult<Arc<dyn ModelSession>>;
}
