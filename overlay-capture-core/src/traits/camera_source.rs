use std::sync::Arc;

use crate::models::config::{CameraPosition, SessionPreset};
use crate::models::device::CameraDevice;
use crate::models::error::CaptureError;
use crate::models::frame::VideoFrame;

/// Something a camera reports from its capture thread.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// A captured frame stamped with the device capture time.
    Frame(VideoFrame),
    /// The device went away; no further frames will arrive.
    DeviceLost(String),
}

/// Callback invoked for every camera event.
///
/// Fires on the camera's own thread; keep the work done inside minimal.
pub type CameraCallback = Arc<dyn Fn(CameraEvent) + Send + Sync + 'static>;

/// Interface for platform-specific camera sources.
pub trait CameraSource: Send + Sync {
    /// Whether the device can capture with this preset at this position.
    fn supports(&self, preset: SessionPreset, position: CameraPosition) -> bool;

    /// Select the device and preset. Called once, when the controller is built.
    fn configure(&mut self, preset: SessionPreset, position: CameraPosition) -> Result<(), CaptureError>;

    /// Open the device and start delivering events via `callback`.
    fn start(&mut self, callback: CameraCallback) -> Result<(), CaptureError>;

    /// Stop delivering events and release the device. Must not return while
    /// the callback is still executing.
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn device_info(&self) -> CameraDevice;
}
