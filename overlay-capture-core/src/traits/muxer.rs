use crate::models::error::CaptureError;
use crate::models::frame::{FrameSize, VideoFrame};
use crate::models::recording::{RecordingResult, RecordingTarget};

/// Format of the audio track of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Streams a recording will contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub video_size: FrameSize,
    pub frame_rate: u32,
    pub audio: Option<AudioFormat>,
}

/// Writes one recording. Driven from the muxing lane only.
pub trait Muxer: Send {
    /// Append a frame. `frame.time()` is on the recording timeline (zero at start,
    /// paused intervals removed).
    fn append_video(&mut self, frame: &VideoFrame) -> Result<(), CaptureError>;

    /// Append interleaved audio in the source's native rate and channel count.
    fn append_audio(&mut self, samples: &[f32], sample_rate: f64, channels: u16) -> Result<(), CaptureError>;

    /// Flush and close the container, producing a valid file.
    fn finish(&mut self) -> Result<RecordingResult, CaptureError>;

    /// Abandon the recording and discard any output written so far.
    fn cancel(&mut self);
}

/// Creates a fresh muxer for each recording.
pub trait MuxerFactory: Send + Sync {
    fn create(&self, target: &RecordingTarget, format: &StreamFormat) -> Result<Box<dyn Muxer>, CaptureError>;
}
