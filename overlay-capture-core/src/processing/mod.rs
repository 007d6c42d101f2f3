pub mod alpha_blend;
pub mod audio_convert;
pub mod avi_format;
pub mod frame_sync;
pub mod pixel_ops;
pub mod timeline;
