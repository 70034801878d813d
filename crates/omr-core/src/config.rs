use crate::bubbles::BubbleLayout;
use crate::focus::FocusParams;
use crate::quality::QualityThresholds;
use crate::registration::RegistrationParams;
use serde::{Deserialize, Serialize};

const DEFAULT_SAMPLE_STRIDE: u32 = 2;
const DEFAULT_BRIGHTNESS_STEP: usize = 4;
/// One display refresh at 60 Hz.
const DEFAULT_FRAME_BUDGET_MS: u64 = 16;

/// Tunables for one analysis pass.
///
/// Every field has a default, so a partial TOML table only overrides what it
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Source pixels between grayscale samples, in both axes.
    pub sample_stride: u32,
    /// Every Nth grayscale sample contributes to the brightness mean.
    pub brightness_step: usize,
    pub focus: FocusParams,
    pub registration: RegistrationParams,
    pub bubbles: BubbleLayout,
    pub thresholds: QualityThresholds,
    /// Passes slower than this are logged as budget overruns.
    pub frame_budget_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            brightness_step: DEFAULT_BRIGHTNESS_STEP,
            focus: FocusParams::default(),
            registration: RegistrationParams::default(),
            bubbles: BubbleLayout::default(),
            thresholds: QualityThresholds::default(),
            frame_budget_ms: DEFAULT_FRAME_BUDGET_MS,
        }
    }
}

impl AnalysisConfig {
    /// Replace every non-finite float (TOML accepts `nan` and `inf`) with its
    /// default. Returns the cleaned config and the names of replaced fields.
    pub fn sanitized(mut self) -> (Self, Vec<&'static str>) {
        let d = Self::default();
        let mut replaced = Vec::new();
        let mut fix = |name: &'static str, value: &mut f32, default: f32| {
            if !value.is_finite() {
                *value = default;
                replaced.push(name);
            }
        };

        fix("focus.normalizer", &mut self.focus.normalizer, d.focus.normalizer);

        let (r, dr) = (&mut self.registration, &d.registration);
        fix("registration.half_size", &mut r.half_size, dr.half_size);
        fix("registration.detection_ratio", &mut r.detection_ratio, dr.detection_ratio);

        let (b, db) = (&mut self.bubbles, &d.bubbles);
        fix("bubbles.origin_x", &mut b.origin_x, db.origin_x);
        fix("bubbles.origin_y", &mut b.origin_y, db.origin_y);
        fix("bubbles.column_width", &mut b.column_width, db.column_width);
        fix("bubbles.row_height", &mut b.row_height, db.row_height);
        fix("bubbles.option_spacing", &mut b.option_spacing, db.option_spacing);
        fix("bubbles.radius", &mut b.radius, db.radius);
        fix("bubbles.fill_threshold", &mut b.fill_threshold, db.fill_threshold);

        let (t, dt) = (&mut self.thresholds, &d.thresholds);
        fix("thresholds.min_focus", &mut t.min_focus, dt.min_focus);
        fix("thresholds.min_brightness", &mut t.min_brightness, dt.min_brightness);
        fix("thresholds.max_brightness", &mut t.max_brightness, dt.max_brightness);
        fix("thresholds.skew_alignment", &mut t.skew_alignment, dt.skew_alignment);
        fix("thresholds.capture_alignment", &mut t.capture_alignment, dt.capture_alignment);

        (self, replaced)
    }
}
