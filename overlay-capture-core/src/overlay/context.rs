use crate::models::error::CaptureError;
use crate::models::frame::{allocate_zeroed, FrameSize, PixelBuffer, PixelFormat};

/// Straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    fn bytes(&self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Axis-aligned rectangle in canvas pixels. May extend past the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// The retained RGBA canvas an overlay renderer draws into.
///
/// Marks persist between frames; nothing clears the canvas except the
/// renderer itself.
#[derive(Debug)]
pub struct DrawContext {
    pixels: Vec<u8>,
    size: FrameSize,
}

impl DrawContext {
    pub(crate) fn allocate(size: FrameSize) -> Result<Self, CaptureError> {
        Ok(Self {
            pixels: allocate_zeroed(size, PixelFormat::Rgba)?,
            size,
        })
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Raw RGBA rows, top-down.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self, color: Color) {
        let bytes = color.bytes();
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&bytes);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let i = self.index(x, y)?;
        let p = &self.pixels[i..i + 4];
        Some(Color::rgba(p[0], p[1], p[2], p[3]))
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i..i + 4].copy_from_slice(&color.bytes());
        }
    }

    /// Replace the pixels under `rect` (clipped to the canvas).
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let bytes = color.bytes();
        self.for_each_in(rect, |px| px.copy_from_slice(&bytes));
    }

    /// Source-over `color` onto the pixels under `rect` (clipped to the canvas).
    pub fn blend_rect(&mut self, rect: Rect, color: Color) {
        let src = color.bytes();
        let alpha = src[3] as u32;
        self.for_each_in(rect, |px| {
            let inv = 255 - alpha;
            for c in 0..3 {
                px[c] = ((src[c] as u32 * alpha + px[c] as u32 * inv + 127) / 255) as u8;
            }
            px[3] = (alpha + (px[3] as u32 * inv + 127) / 255) as u8;
        });
    }

    /// Copy the canvas into a new, independent pixel buffer.
    pub(crate) fn snapshot(&self) -> Result<PixelBuffer, CaptureError> {
        let mut data = Vec::new();
        data.try_reserve_exact(self.pixels.len())
            .map_err(|e| CaptureError::AllocationFailed(format!("cannot copy overlay canvas: {}", e)))?;
        data.extend_from_slice(&self.pixels);
        PixelBuffer::from_data(self.size, PixelFormat::Rgba, data)
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some((y as usize * self.size.width as usize + x as usize) * 4)
    }

    fn for_each_in(&mut self, rect: Rect, mut f: impl FnMut(&mut [u8])) {
        let x0 = rect.x.max(0) as i64;
        let y0 = rect.y.max(0) as i64;
        let x1 = (rect.x as i64 + rect.width as i64).min(self.size.width as i64);
        let y1 = (rect.y as i64 + rect.height as i64).min(self.size.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.size.width as usize * 4;
        for y in y0 as usize..y1 as usize {
            let row = &mut self.pixels[y * stride..(y + 1) * stride];
            for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                f(px);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(w: u32, h: u32) -> DrawContext {
        DrawContext::allocate(FrameSize::new(w, h)).unwrap()
    }

    #[test]
    fn starts_transparent() {
        let ctx = context(3, 2);
        assert_eq!(ctx.pixels().len(), 24);
        assert_eq!(ctx.pixel(2, 1), Some(Color::TRANSPARENT));
        assert_eq!(ctx.pixel(3, 0), None);
    }

    #[test]
    fn fill_rect_is_clipped() {
        let mut ctx = context(4, 4);
        ctx.fill_rect(Rect::new(-2, 2, 4, 10), Color::WHITE);
        assert_eq!(ctx.pixel(0, 2), Some(Color::WHITE));
        assert_eq!(ctx.pixel(1, 3), Some(Color::WHITE));
        assert_eq!(ctx.pixel(2, 2), Some(Color::TRANSPARENT));
        assert_eq!(ctx.pixel(0, 1), Some(Color::TRANSPARENT));
    }

    #[test]
    fn fill_rect_outside_canvas_is_noop() {
        let mut ctx = context(2, 2);
        ctx.fill_rect(Rect::new(5, 5, 3, 3), Color::WHITE);
        assert!(ctx.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn blend_rect_composes_over_existing() {
        let mut ctx = context(1, 1);
        ctx.clear(Color::BLACK);
        ctx.blend_rect(Rect::new(0, 0, 1, 1), Color::rgba(255, 255, 255, 128));
        assert_eq!(ctx.pixel(0, 0), Some(Color::rgba(128, 128, 128, 255)));
    }

    #[test]
    fn snapshot_is_independent() {
        let mut ctx = context(1, 1);
        ctx.set_pixel(0, 0, Color::WHITE);
        let snap = ctx.snapshot().unwrap();
        ctx.clear(Color::BLACK);
        assert_eq!(snap.data(), &[255, 255, 255, 255]);
        assert!(snap.has_data());
    }
}
