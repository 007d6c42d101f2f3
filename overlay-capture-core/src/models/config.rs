use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::frame::{FrameSize, MAX_DIMENSION};

/// Capture quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPreset {
    Low,
    Medium,
    High,
    Photo,
    Cif352x288,
    Vga640x480,
    Hd1280x720,
    Hd1920x1080,
    Uhd3840x2160,
}

impl SessionPreset {
    pub const ALL: [SessionPreset; 9] = [
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Photo,
        Self::Cif352x288,
        Self::Vga640x480,
        Self::Hd1280x720,
        Self::Hd1920x1080,
        Self::Uhd3840x2160,
    ];

    /// Nominal frame size delivered by a camera running this preset.
    pub fn frame_size(&self) -> FrameSize {
        match self {
            Self::Low => FrameSize::new(192, 144),
            Self::Medium => FrameSize::new(480, 360),
            Self::High => FrameSize::new(1280, 720),
            Self::Photo => FrameSize::new(1920, 1440),
            Self::Cif352x288 => FrameSize::new(352, 288),
            Self::Vga640x480 => FrameSize::new(640, 480),
            Self::Hd1280x720 => FrameSize::new(1280, 720),
            Self::Hd1920x1080 => FrameSize::new(1920, 1080),
            Self::Uhd3840x2160 => FrameSize::new(3840, 2160),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Photo => "photo",
            Self::Cif352x288 => "352x288",
            Self::Vga640x480 => "640x480",
            Self::Hd1280x720 => "1280x720",
            Self::Hd1920x1080 => "1920x1080",
            Self::Uhd3840x2160 => "3840x2160",
        }
    }
}

impl FromStr for SessionPreset {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CaptureError::ConfigurationFailed(format!("unknown session preset: {}", s)))
    }
}

/// Which physical camera to capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

impl FromStr for CameraPosition {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            other => Err(CaptureError::ConfigurationFailed(format!(
                "unknown camera position: {}",
                other
            ))),
        }
    }
}

/// Configuration for one capture controller. Immutable once the controller exists.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfiguration {
    pub preset: SessionPreset,

    pub camera_position: CameraPosition,

    /// Stamp frames with the device capture timestamp instead of wall-clock time (default: true).
    pub use_capture_time: bool,

    /// Attach a microphone track to recordings (default: false).
    pub capture_audio: bool,

    /// Record the composited output; when false the raw camera frame is recorded
    /// while the overlay is still rendered for display (default: true).
    pub record_overlay: bool,

    /// Constant frame rate of recorded files (default: 30).
    pub recording_frame_rate: u32,

    /// Sample rate of the recorded audio track in Hz (default: 48000).
    pub audio_sample_rate: u32,

    /// Channel count of the recorded audio track (default: 2).
    pub audio_channels: u16,

    /// Overlay canvas size, or None to use the preset's frame size.
    pub overlay_size: Option<FrameSize>,
}

impl SessionConfiguration {
    pub fn new(preset: SessionPreset, camera_position: CameraPosition) -> Self {
        Self {
            preset,
            camera_position,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=240).contains(&self.recording_frame_rate) {
            return Err(format!("unsupported frame rate: {}", self.recording_frame_rate));
        }
        if !(8000..=192000).contains(&self.audio_sample_rate) {
            return Err(format!("unsupported audio sample rate: {}", self.audio_sample_rate));
        }
        if ![1, 2].contains(&self.audio_channels) {
            return Err(format!("unsupported channel count: {}", self.audio_channels));
        }
        if let Some(size) = self.overlay_size {
            if size.is_empty() || size.width > MAX_DIMENSION || size.height > MAX_DIMENSION {
                return Err(format!("unsupported overlay size: {}", size));
            }
        }
        Ok(())
    }

    /// Size the overlay canvas is rendered at.
    pub fn overlay_frame_size(&self) -> FrameSize {
        self.overlay_size.unwrap_or_else(|| self.preset.frame_size())
    }
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            preset: SessionPreset::High,
            camera_position: CameraPosition::Back,
            use_capture_time: true,
            capture_audio: false,
            record_overlay: true,
            recording_frame_rate: 30,
            audio_sample_rate: 48000,
            audio_channels: 2,
            overlay_size: None,
        }
    }
}
