pub mod avi_muxer;
pub mod avi_writer;
pub mod metadata;
