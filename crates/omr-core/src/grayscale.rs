//! Strided RGB(A) → luminance downsampling.

use crate::types::GrayscaleBuffer;

/// Integer BT.601 luma weights, scaled by 1000.
const LUMA_R: u32 = 299;
const LUMA_G: u32 = 587;
const LUMA_B: u32 = 114;

/// Perceptual luminance of one RGB pixel, rounded to the nearest integer.
///
/// The weights sum to exactly 1000, so white maps to 255 and black to 0.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32 + 500) / 1000) as u8
}

/// Downsample an interleaved pixel buffer to luminance, keeping every
/// `stride`-th pixel in each axis.
///
/// Output is `ceil(width / stride) × ceil(height / stride)`. `channels` is the
/// number of bytes per source pixel: 1 or 2 are treated as gray (+ alpha),
/// 3 or more as RGB with any trailing channels ignored. Pixels missing from a
/// short buffer read as 0.
pub fn to_grayscale(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    stride: u32,
) -> GrayscaleBuffer {
    let stride = stride.max(1);
    let channels = channels.max(1);
    let out_w = width.div_ceil(stride);
    let out_h = height.div_ceil(stride);

    let mut data = Vec::with_capacity(out_w as usize * out_h as usize);
    for oy in 0..out_h {
        let row = (oy * stride) as usize * width as usize;
        for ox in 0..out_w {
            let idx = (row + (ox * stride) as usize) * channels;
            data.push(sample(pixels, idx, channels));
        }
    }

    GrayscaleBuffer {
        data,
        width: out_w,
        height: out_h,
        stride,
        source_width: width,
        source_height: height,
    }
}

fn sample(pixels: &[u8], idx: usize, channels: usize) -> u8 {
    if channels < 3 {
        return pixels.get(idx).copied().unwrap_or(0);
    }
    match pixels.get(idx..idx + 3) {
        Some(rgb) => luminance(rgb[0], rgb[1], rgb[2]),
        None => 0,
    }
}
