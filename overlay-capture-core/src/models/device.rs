use super::config::{CameraPosition, SessionPreset};

/// A camera available for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub id: String,
    pub name: String,
    pub position: CameraPosition,
    pub presets: Vec<SessionPreset>,
}

/// A microphone available for the recording audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Counters for debugging a running pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDiagnostics {
    pub camera_frames: u64,
    pub frames_dropped_paused: u64,
    pub render_requests_dropped: u64,
    pub overlay_renders: u64,
    pub render_failures: u64,
    pub composited_frames: u64,
    pub unmatched_frames: u64,
    pub recorded_video_frames: u64,
    pub recorded_audio_buffers: u64,
    pub displayed_frames: u64,
    pub display_frames_dropped: u64,
}
