//! Pixel buffer operations shared by the compositor and the muxer.
//!
//! All buffers are 4 bytes per pixel, tightly packed, top-down.

use std::borrow::Cow;

use crate::models::frame::{FrameSize, PixelBuffer, PixelFormat};

/// Nearest-neighbour stretch of `src` to `target`, keeping the pixel format.
pub fn scale_nearest(src: &PixelBuffer, target: FrameSize) -> Vec<u8> {
    let src_size = src.size();
    if src_size == target {
        return src.data().to_vec();
    }

    let mut output = vec![0u8; target.pixel_count() * 4];
    if src_size.is_empty() || target.is_empty() {
        return output;
    }

    let data = src.data();
    let src_w = src_size.width as usize;
    for dst_y in 0..target.height as usize {
        let src_y = dst_y * src_size.height as usize / target.height as usize;
        let src_row = src_y * src_w * 4;
        let dst_row = dst_y * target.width as usize * 4;
        for dst_x in 0..target.width as usize {
            let src_x = dst_x * src_w / target.width as usize;
            let s = src_row + src_x * 4;
            let d = dst_row + dst_x * 4;
            output[d..d + 4].copy_from_slice(&data[s..s + 4]);
        }
    }
    output
}

/// Source-over blend of one straight-alpha pixel onto an opaque destination pixel.
///
/// Both pixels must share the same component order; the destination alpha is kept.
#[inline]
pub fn blend_pixel(dst: &mut [u8], src: &[u8]) {
    let alpha = src[3] as u32;
    match alpha {
        0 => {}
        255 => dst[..3].copy_from_slice(&src[..3]),
        _ => {
            let inv = 255 - alpha;
            for c in 0..3 {
                dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inv + 127) / 255) as u8;
            }
        }
    }
}

/// Blend `overlay` over `base` in place. `overlay` is scaled to the base size
/// and reordered to the base format first when needed.
pub fn blend_over(base: &mut [u8], base_size: FrameSize, base_format: PixelFormat, overlay: &PixelBuffer) {
    let overlay = if overlay.format() != base_format {
        Cow::Owned(overlay.converted(base_format))
    } else {
        Cow::Borrowed(overlay)
    };
    let scaled;
    let src: &[u8] = if overlay.size() == base_size {
        overlay.data()
    } else {
        scaled = scale_nearest(&overlay, base_size);
        &scaled
    };

    for (dst, src) in base.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        blend_pixel(dst, src);
    }
}

/// Bottom-up BGRA rows, the layout of an uncompressed 32-bit DIB.
pub fn to_bottom_up_bgra(src: &PixelBuffer) -> Vec<u8> {
    let bgra = match src.format() {
        PixelFormat::Bgra => Cow::Borrowed(src),
        _ => Cow::Owned(src.converted(PixelFormat::Bgra)),
    };
    let stride = bgra.stride();
    let mut output = Vec::with_capacity(bgra.data().len());
    for row in bgra.data().chunks_exact(stride).rev() {
        output.extend_from_slice(row);
    }
    output
}
