pub mod camera_source;
pub mod capture_delegate;
pub mod compositor;
pub mod frame_sink;
pub mod microphone_source;
pub mod muxer;
