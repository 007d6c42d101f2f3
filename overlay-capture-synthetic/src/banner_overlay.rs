use std::time::Duration;

use overlay_capture_core::models::frame::FrameSize;
use overlay_capture_core::overlay::context::{Color, DrawContext, Rect};
use overlay_capture_core::overlay::source::OverlayRenderer;

/// Draws a translucent banner along the bottom edge with a progress bar that
/// fills once per second of presentation time.
///
/// Content only changes when the bar grows or wraps, so many requests
/// republish the previous buffer.
pub struct BannerOverlay {
    banner: Color,
    bar: Color,
    steps: u32,
    last_step: Option<u32>,
}

impl BannerOverlay {
    pub fn new() -> Self {
        Self {
            banner: Color::rgba(0, 0, 0, 128),
            bar: Color::rgba(255, 64, 32, 255),
            steps: 10,
            last_step: None,
        }
    }

    fn banner_rect(size: FrameSize) -> Rect {
        let height = (size.height / 8).max(1);
        Rect::new(0, (size.height - height) as i32, size.width, height)
    }
}

impl Default for BannerOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer for BannerOverlay {
    fn setup(&mut self, context: &mut DrawContext, size: FrameSize) {
        context.clear(Color::TRANSPARENT);
        context.fill_rect(Self::banner_rect(size), self.banner);
    }

    fn update(&mut self, context: &mut DrawContext, size: FrameSize, time: Duration) -> Result<bool, String> {
        let step = (time.subsec_millis() * self.steps / 1000).min(self.steps - 1);
        if self.last_step == Some(step) {
            return Ok(false);
        }
        self.last_step = Some(step);

        let banner = Self::banner_rect(size);
        context.fill_rect(banner, self.banner);
        let filled = size.width * (step + 1) / self.steps;
        let bar_height = (banner.height / 2).max(1);
        context.fill_rect(Rect::new(0, banner.y, filled, bar_height), self.bar);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use overlay_capture_core::overlay::source::OverlaySource;

    use super::*;

    #[test]
    fn redraws_only_when_the_bar_moves() {
        let size = FrameSize::new(20, 16);
        let overlay = OverlaySource::with_renderer(size, BannerOverlay::new()).unwrap();

        assert!(overlay.request_frame(Duration::from_millis(0)).unwrap());
        assert!(!overlay.request_frame(Duration::from_millis(50)).unwrap());
        assert!(overlay.request_frame(Duration::from_millis(150)).unwrap());

        overlay.with_published(|buffer, time| {
            assert_eq!(time, Duration::from_millis(150));
            let stride = buffer.stride();
            let row = 14 * stride;
            // Two of ten steps filled: first 4 pixels are bar, the rest banner.
            assert_eq!(&buffer.data()[row..row + 4], &[255, 64, 32, 255]);
            assert_eq!(&buffer.data()[row + 4 * 4..row + 4 * 4 + 4], &[0, 0, 0, 128]);
            // Above the banner stays transparent.
            assert_eq!(&buffer.data()[0..4], &[0, 0, 0, 0]);
        });
    }
}
