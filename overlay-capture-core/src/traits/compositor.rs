use crate::models::frame::PixelBuffer;

/// Two-input filter combining a camera frame and an overlay frame.
///
/// Called once per synchronized pair, from whichever lane completed the pair,
/// while the pairing lock is held. It must not call back into the controller.
pub trait Compositor: Send + Sync {
    fn composite(&self, camera: &PixelBuffer, overlay: &PixelBuffer) -> PixelBuffer;
}
