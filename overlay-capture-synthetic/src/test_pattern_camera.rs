//! Synthetic camera source.
//!
//! Renders a moving test pattern on a dedicated thread at a fixed frame rate
//! and stamps each frame with its capture time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use overlay_capture_core::models::config::{CameraPosition, SessionPreset};
use overlay_capture_core::models::device::CameraDevice;
use overlay_capture_core::models::error::CaptureError;
use overlay_capture_core::models::frame::{FrameSize, PixelBuffer, PixelFormat, VideoFrame};
use overlay_capture_core::traits::camera_source::{CameraCallback, CameraEvent, CameraSource};

/// Test-pattern camera.
///
/// The front camera tops out at 1280x720; the back camera supports every
/// preset below 4K.
pub struct TestPatternCamera {
    position: CameraPosition,
    frame_rate: u32,
    size: FrameSize,
    size_override: Option<FrameSize>,
    lose_after: Option<u64>,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TestPatternCamera {
    pub fn new(position: CameraPosition) -> Self {
        Self {
            position,
            frame_rate: 30,
            size: SessionPreset::High.frame_size(),
            size_override: None,
            lose_after: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }

    /// Deliver frames at `frame_rate` per second instead of 30.
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    /// Deliver frames of `size` regardless of the configured preset.
    pub fn with_frame_size(mut self, size: FrameSize) -> Self {
        self.size_override = Some(size);
        self.size = size;
        self
    }

    /// Report the device as lost after `frames` frames.
    pub fn lose_device_after(mut self, frames: u64) -> Self {
        self.lose_after = Some(frames);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn supported_presets(&self) -> Vec<SessionPreset> {
        SessionPreset::ALL
            .iter()
            .copied()
            .filter(|preset| match self.position {
                CameraPosition::Front => {
                    let size = preset.frame_size();
                    size.width <= 1280 && size.height <= 720
                }
                CameraPosition::Back => *preset != SessionPreset::Uhd3840x2160,
            })
            .collect()
    }
}

impl CameraSource for TestPatternCamera {
    fn supports(&self, preset: SessionPreset, position: CameraPosition) -> bool {
        position == self.position && self.supported_presets().contains(&preset)
    }

    fn configure(&mut self, preset: SessionPreset, position: CameraPosition) -> Result<(), CaptureError> {
        if !self.supports(preset, position) {
            return Err(CaptureError::DeviceError(format!(
                "test pattern camera cannot capture {} at the {:?} position",
                preset.as_str(),
                position
            )));
        }
        self.size = self.size_override.unwrap_or_else(|| preset.frame_size());
        log::debug!("test pattern camera configured for {} ({})", preset.as_str(), self.size);
        Ok(())
    }

    fn start(&mut self, callback: CameraCallback) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceError("test pattern camera already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let size = self.size;
        let frame_rate = self.frame_rate;
        let lose_after = self.lose_after;

        let handle = thread::Builder::new()
            .name("test-pattern-camera".into())
            .spawn(move || {
                if let Err(e) = capture_loop(&running, size, frame_rate, lose_after, &callback) {
                    log::error!("test pattern camera failed: {}", e);
                    callback(CameraEvent::DeviceLost(e.to_string()));
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::DeviceError(format!("failed to spawn camera thread: {}", e))
            })?;

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn device_info(&self) -> CameraDevice {
        let (id, name) = match self.position {
            CameraPosition::Front => ("test-pattern-front", "Test Pattern (front)"),
            CameraPosition::Back => ("test-pattern-back", "Test Pattern (back)"),
        };
        CameraDevice {
            id: id.into(),
            name: name.into(),
            position: self.position,
            presets: self.supported_presets(),
        }
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Frame loop running on the camera thread. Frames are paced against the
/// start instant so delivery does not drift.
fn capture_loop(
    running: &AtomicBool,
    size: FrameSize,
    frame_rate: u32,
    lose_after: Option<u64>,
    callback: &CameraCallback,
) -> Result<(), CaptureError> {
    let interval = Duration::from_secs(1) / frame_rate;
    let started = Instant::now();
    let mut index: u64 = 0;

    while running.load(Ordering::SeqCst) {
        if lose_after == Some(index) {
            log::warn!("test pattern camera disconnecting after {} frames", index);
            callback(CameraEvent::DeviceLost("test pattern camera disconnected".into()));
            return Ok(());
        }

        let buffer = PixelBuffer::from_data(size, PixelFormat::Bgra, pattern(size, index))?;
        let capture_time = interval * index as u32;
        callback(CameraEvent::Frame(VideoFrame::new(buffer, capture_time)));

        index += 1;
        let next = started + interval * index as u32;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    log::debug!("test pattern camera stopped after {} frames", index);
    Ok(())
}

/// Gradient background with a white bar sweeping left to right.
fn pattern(size: FrameSize, index: u64) -> Vec<u8> {
    let (width, height) = (size.width as usize, size.height as usize);
    let bar_width = (width / 32).max(1);
    let bar = (index as usize * bar_width) % width.max(1);

    let mut data = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            if x >= bar && x < bar + bar_width {
                data.extend_from_slice(&[255, 255, 255, 255]);
            } else {
                let b = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                data.extend_from_slice(&[b, g, 64, 255]);
            }
        }
    }
    data
}
