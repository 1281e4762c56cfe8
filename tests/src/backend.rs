use cutout_core::{BackendResult, ImageBuffer, ModelSession, PixelFormat, SegmentationBackend};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Build a 1x1 RGB test image whose pixels all carry `tag`.
///
/// The mock backend keys its scripted behavior on that tag.
pub fn tagged_image(tag: u8) -> ImageBuffer {
    ImageBuffer::from_raw(1, 1, PixelFormat::Rgb8, vec![tag; 3]).expect("1x1 rgb buffer")
}

/// Tag of an image produced by [`tagged_image`] (or the mock's output)
pub fn tag_of(image: &ImageBuffer) -> u8 {
    image.as_bytes().first().copied().unwrap_or_default()
}

#[derive(Default)]
struct MockState {
    loads: AtomicUsize,
    inferences: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    live_sessions: Arc<AtomicUsize>,
    fail_loads: AtomicBool,
    load_delay: RwLock<Duration>,
    infer_delay: RwLock<Duration>,
    slow_images: RwLock<HashMap<u8, Duration>>,
    failing_images: RwLock<HashSet<u8>>,
}

/// A scriptable segmentation backend.
///
/// It counts loads and inferences, tracks how many sessions are still alive
/// and how many inferences ran at once, and can be told to fail or stall
/// loads and individual images. Output images are the input with an opaque
/// alpha channel added.
#[derive(Clone, Default)]
pub struct MockSegmentationBackend {
    state: Arc<MockState>,
}

impl MockSegmentationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(self, delay: Duration) -> Self {
        *self.state.load_delay.write() = delay;
        self
    }

    pub fn with_infer_delay(self, delay: Duration) -> Self {
        *self.state.infer_delay.write() = delay;
        self
    }

    /// Make every subsequent load fail (or succeed again).
    pub fn set_fail_loads(&self, fail: bool) {
        self.state.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Images tagged `tag` take `delay` to process.
    pub fn add_slow_image(&self, tag: u8, delay: Duration) {
        self.state.slow_images.write().insert(tag, delay);
    }

    /// Images tagged `tag` fail to process.
    pub fn add_failing_image(&self, tag: u8) {
        self.state.failing_images.write().insert(tag);
    }

    pub fn load_count(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    pub fn inference_count(&self) -> usize {
        self.state.inferences.load(Ordering::SeqCst)
    }

    /// Highest number of inferences observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak_running.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet dropped
    pub fn live_sessions(&self) -> usize {
        self.state.live_sessions.load(Ordering::SeqCst)
    }

    pub fn into_backend(self) -> Arc<dyn SegmentationBackend> {
        Arc::new(self)
    }
}

impl SegmentationBackend for MockSegmentationBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn load(&self, model_id: &str, _cache_dir: &Path) -> BackendResult<Arc<dyn ModelSession>> {
        self.state.loads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.load_delay.read();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.state.fail_loads.load(Ordering::SeqCst) {
            return Err(format!("mock failed to load {model_id}").into());
        }

        self.state.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

impl ModelSession for MockSession {
    fn infer(&self, image: &ImageBuffer) -> BackendResult<ImageBuffer> {
        let state = &self.state;
        state.inferences.fetch_add(1, Ordering::SeqCst);
        let now = state.running.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_running.fetch_max(now, Ordering::SeqCst);

        let tag = tag_of(image);
        let delay = state
            .slow_images
            .read()
            .get(&tag)
            .copied()
            .unwrap_or_else(|| *state.infer_delay.read());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let fails = state.failing_images.read().contains(&tag);

        state.running.fetch_sub(1, Ordering::SeqCst);

        if fails {
            return Err(format!("cannot segment image tagged {tag}").into());
        }
        Ok(add_alpha(image))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn add_alpha(image: &ImageBuffer) -> ImageBuffer {
    let data: Vec<u8> = match image.format() {
        PixelFormat::Rgba8 => image.as_bytes().to_vec(),
        PixelFormat::Rgb8 => image
            .as_bytes()
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], u8::MAX])
            .collect(),
        PixelFormat::Luma8 => image
            .as_bytes()
            .iter()
            .flat_map(|&l| [l, l, l, u8::MAX])
            .collect(),
    };
    ImageBuffer::from_raw(image.width(), image.height(), PixelFormat::Rgba8, data)
        .expect("rgba buffer has matching length")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_adds_alpha() {
        let backend = MockSegmentationBackend::new();
        let session = backend.load("m", Path::new("/tmp")).unwrap();
        let out = session.infer(&tagged_image(9)).unwrap();
        assert_eq!(out.format(), PixelFormat::Rgba8);
        assert_eq!(out.as_bytes(), &[9, 9, 9, 255]);
        assert_eq!(backend.load_count(), 1);
        assert_eq!(backend.inference_count(), 1);
    }

    #[test]
    fn test_live_sessions_tracked() {
        let backend = MockSegmentationBackend::new();
        let session = backend.load("m", Path::new("/tmp")).unwrap();
        assert_eq!(backend.live_sessions(), 1);
        drop(session);
        assert_eq!(backend.live_sessions(), 0);
    }

    #[test]
    fn test_failing_image_and_load() {
        let backend = MockSegmentationBackend::new();
        backend.add_failing_image(3);
        let session = backend.load("m", Path::new("/tmp")).unwrap();
        assert!(session.infer(&tagged_image(3)).is_err());
        assert!(session.infer(&tagged_image(4)).is_ok());

        backend.set_fail_loads(true);
        assert!(backend.load("m", Path::new("/tmp")).is_err());
        assert_eq!(backend.live_sessions(), 1);
    }
}
