//! Laplacian sharpness estimate over a sampled luminance buffer.

use crate::types::GrayscaleBuffer;
use serde::{Deserialize, Serialize};

/// Pixels skipped at each edge so the kernel never leaves the buffer.
const BORDER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusParams {
    /// Kernel evaluated every `sample_step` samples in both axes.
    pub sample_step: u32,
    /// Mean squared response that maps to a focus score of 1.0.
    pub normalizer: f32,
}

impl Default for FocusParams {
    fn default() -> Self {
        Self {
            sample_step: 2,
            normalizer: 1000.0,
        }
    }
}

/// Mean squared 4-neighbour Laplacian response over the interior.
///
/// Kernel:
///   0 -1  0
///  -1  4 -1
///   0 -1  0
/// Returns 0.0 when the buffer has no interior pixels.
pub fn mean_squared_laplacian(gray: &GrayscaleBuffer, step: u32) -> f64 {
    let w = gray.width;
    let h = gray.height;
    if w <= 2 * BORDER || h <= 2 * BORDER || gray.data.len() < (w * h) as usize {
        return 0.0;
    }

    let step = step.max(1) as usize;
    let stride = w as usize;
    let data = &gray.data;

    let mut sum_sq = 0.0f64;
    let mut count = 0usize;

    for y in (BORDER..h - BORDER).step_by(step) {
        let row = y as usize * stride;
        for x in (BORDER..w - BORDER).step_by(step) {
            let idx = row + x as usize;
            let lap = 4 * data[idx] as i32
                - data[idx - stride] as i32
                - data[idx + stride] as i32
                - data[idx - 1] as i32
                - data[idx + 1] as i32;
            sum_sq += (lap * lap) as f64;
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }
    sum_sq / count as f64
}

/// Sharpness score in [0, 1]; higher means more local second-derivative energy.
pub fn estimate_focus(gray: &GrayscaleBuffer, params: &FocusParams) -> f32 {
    let response = mean_squared_laplacian(gray, params.sample_step);
    if params.normalizer <= 0.0 {
        return if response > 0.0 { 1.0 } else { 0.0 };
    }
    ((response / params.normalizer as f64) as f32).clamp(0.0, 1.0)
}
