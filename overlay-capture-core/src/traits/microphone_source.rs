use std::sync::Arc;

use crate::models::device::AudioDevice;
use crate::models::error::CaptureError;

/// Callback invoked when an audio buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of interleaved channels.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], f64, u16) + Send + Sync + 'static>;

/// Interface for platform-specific microphone sources.
pub trait MicrophoneSource: Send + Sync {
    fn is_available(&self) -> bool;

    /// Start capturing audio, delivering buffers via `callback`.
    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), CaptureError>;

    /// Stop capturing and release resources.
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn device_info(&self) -> AudioDevice;
}
