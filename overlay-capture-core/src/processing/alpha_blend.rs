use crate::models::frame::PixelBuffer;
use crate::processing::pixel_ops;
use crate::traits::compositor::Compositor;

/// Default compositor: the overlay is alpha-blended over the camera frame.
///
/// Output has the camera frame's size and pixel format; the overlay is
/// stretched to fit. A blank overlay (`has_data() == false`) passes the
/// camera frame through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaBlendCompositor;

impl Compositor for AlphaBlendCompositor {
    fn composite(&self, camera: &PixelBuffer, overlay: &PixelBuffer) -> PixelBuffer {
        if !overlay.has_data() {
            return camera.clone();
        }
        let mut data = camera.data().to_vec();
        pixel_ops::blend_over(&mut data, camera.size(), camera.format(), overlay);
        // Same size and format as the camera buffer, so the length always matches.
        PixelBuffer::from_data(camera.size(), camera.format(), data).unwrap_or_else(|_| camera.clone())
    }
}
