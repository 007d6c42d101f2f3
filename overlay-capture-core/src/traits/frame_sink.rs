use crate::models::frame::VideoFrame;

/// Live consumer of composited frames (preview surface, network stream, ...).
///
/// Called on the `display` lane, one frame at a time in capture order, with no
/// pipeline lock held. It may call back into the controller, including pausing
/// or stopping capture. A sink that falls behind loses frames; capture does not
/// wait for it.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}
