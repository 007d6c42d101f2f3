//! Synthetic microphone source producing a continuous sine tone.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use overlay_capture_core::models::device::AudioDevice;
use overlay_capture_core::models::error::CaptureError;
use overlay_capture_core::traits::microphone_source::{AudioBufferCallback, MicrophoneSource};

/// Length of each delivered buffer.
const BUFFER_DURATION: Duration = Duration::from_millis(20);

/// Sine-tone microphone.
///
/// Delivers interleaved Float32 buffers every 20 ms on a dedicated thread,
/// with the phase carried across buffers.
pub struct ToneMicrophone {
    frequency: f64,
    amplitude: f32,
    sample_rate: u32,
    channels: u16,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ToneMicrophone {
    /// A 440 Hz tone at 48 kHz stereo.
    pub fn new() -> Self {
        Self::with_format(440.0, 48000, 2)
    }

    pub fn with_format(frequency: f64, sample_rate: u32, channels: u16) -> Self {
        Self {
            frequency,
            amplitude: 0.25,
            sample_rate,
            channels: channels.max(1),
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ToneMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneSource for ToneMicrophone {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceError("tone microphone already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let mut tone = Tone {
            step: TAU * self.frequency / self.sample_rate as f64,
            phase: 0.0,
            amplitude: self.amplitude,
            channels: self.channels,
        };
        let sample_rate = self.sample_rate;
        let frames_per_buffer = (sample_rate as u64 * BUFFER_DURATION.as_millis() as u64 / 1000) as usize;

        let handle = thread::Builder::new()
            .name("tone-microphone".into())
            .spawn(move || {
                let started = Instant::now();
                let mut buffers: u32 = 0;
                while running.load(Ordering::SeqCst) {
                    let samples = tone.next_buffer(frames_per_buffer);
                    callback(&samples, sample_rate as f64, tone.channels);

                    buffers += 1;
                    let next = started + BUFFER_DURATION * buffers;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                log::debug!("tone microphone stopped after {} buffers", buffers);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::DeviceError(format!("failed to spawn microphone thread: {}", e))
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

    fn device_info(&self) -> AudioDevice {
        AudioDevice {
            id: "tone-microphone".into(),
            name: format!("Tone {:.0} Hz", self.frequency),
            is_default: true,
        }
    }
}

impl Drop for ToneMicrophone {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct Tone {
    step: f64,
    phase: f64,
    amplitude: f32,
    channels: u16,
}

impl Tone {
    fn next_buffer(&mut self, frames: usize) -> Vec<f32> {
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let value = self.phase.sin() as f32 * self.amplitude;
            samples.extend(std::iter::repeat(value).take(self.channels as usize));
            self.phase = (self.phase + self.step) % TAU;
        }
        samples
    }
}
