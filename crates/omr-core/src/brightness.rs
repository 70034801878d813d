use crate::types::GrayscaleBuffer;

/// Mean luminance of every `step`-th sample, normalized to [0, 1].
///
/// Returns 0.0 for an empty buffer.
pub fn estimate_brightness(gray: &GrayscaleBuffer, step: usize) -> f32 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for &p in gray.data.iter().step_by(step.max(1)) {
        sum += p as u64;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum as f64 / count as f64 / 255.0) as f32
}
