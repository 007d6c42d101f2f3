//! # overlay-capture-synthetic
//!
//! Hardware-free backend for overlay-capture-core.
//!
//! Implements `CameraSource` with a thread-driven test pattern and
//! `MicrophoneSource` with a sine tone, so the full capture, overlay and
//! recording pipeline can run on any machine.

pub mod banner_overlay;
pub mod test_pattern_camera;
pub mod tone_microphone;

#[cfg(test)]
mod scenarios;

pub use banner_overlay::BannerOverlay;
pub use test_pattern_camera::TestPatternCamera;
pub use tone_microphone::ToneMicrophone;
