//! # overlay-capture-core
//!
//! Platform-agnostic camera capture core library.
//!
//! Provides overlay rendering, camera/overlay compositing, still capture,
//! AVI recording and the capture/recording state machines. Platform-specific
//! backends implement the `CameraSource` and `MicrophoneSource` traits and
//! plug into the generic `CaptureController`.
//!
//! ## Architecture
//!
//! ```text
//! overlay-capture-core (this crate)
//! ├── traits/       ← CameraSource, MicrophoneSource, Compositor, Muxer, FrameSink, CaptureDelegate
//! ├── models/       ← CaptureError, CaptureState, SessionConfiguration, PixelBuffer, etc.
//! ├── processing/   ← frame synchronizer, alpha blend, pixel ops, audio conversion, AVI headers
//! ├── overlay/      ← OverlaySource, DrawContext
//! ├── session/      ← CaptureController and its render/mux lanes
//! └── storage/      ← AviMuxer, AviWriter, optional metadata sidecar
//! ```

pub mod models;
pub mod overlay;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{CameraPosition, SessionConfiguration, SessionPreset};
pub use models::device::{AudioDevice, CameraDevice, PipelineDiagnostics};
pub use models::error::CaptureError;
pub use models::frame::{FrameSize, PixelBuffer, PixelFormat, StillImage, VideoFrame};
pub use models::recording::{MetadataItem, RecordingMetadata, RecordingResult, RecordingTarget};
pub use models::state::{CaptureState, RecordingState};
pub use overlay::context::{Color, DrawContext, Rect};
pub use overlay::source::{OverlayRenderer, OverlaySource};
pub use processing::alpha_blend::AlphaBlendCompositor;
pub use session::controller::CaptureController;
pub use storage::avi_muxer::{AviMuxer, AviMuxerFactory};
pub use traits::camera_source::{CameraCallback, CameraEvent, CameraSource};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::compositor::Compositor;
pub use traits::frame_sink::FrameSink;
pub use traits::microphone_source::{AudioBufferCallback, MicrophoneSource};
pub use traits::muxer::{AudioFormat, Muxer, MuxerFactory, StreamFormat};
