//! Quality aggregation and the capture gate.

use crate::types::{AlignmentStatus, QualityIssue, QualityMetrics};
use serde::{Deserialize, Serialize};

// Overall score weights; focus dominates because blur is unrecoverable.
const WEIGHT_FOCUS: f32 = 0.4;
const WEIGHT_BRIGHTNESS: f32 = 0.3;
const WEIGHT_ALIGNMENT: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_focus: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Below this the paper is reported as skewed.
    pub skew_alignment: f32,
    /// Below this capture is not allowed.
    pub capture_alignment: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_focus: 0.7,
            min_brightness: 0.3,
            max_brightness: 0.8,
            skew_alignment: 0.8,
            capture_alignment: 0.75,
        }
    }
}

/// Combine per-frame scores into [`QualityMetrics`].
///
/// Issues are listed in a fixed order: focus, too dark, too bright, paper not
/// found, skew. Each issue contributes exactly one recommendation.
pub fn aggregate(
    focus: f32,
    brightness: f32,
    alignment: &AlignmentStatus,
    thresholds: &QualityThresholds,
) -> QualityMetrics {
    let align = alignment.alignment;

    let mut issues = Vec::new();
    if focus < thresholds.min_focus {
        issues.push(QualityIssue::NotSharp);
    }
    if brightness < thresholds.min_brightness {
        issues.push(QualityIssue::TooDark);
    }
    if brightness > thresholds.max_brightness {
        issues.push(QualityIssue::TooBright);
    }
    if !alignment.paper_detected {
        issues.push(QualityIssue::PaperNotFound);
    }
    if align < thresholds.skew_alignment {
        issues.push(QualityIssue::Skewed);
    }
    let recommendations = issues
        .iter()
        .map(|i| i.recommendation().to_string())
        .collect();

    QualityMetrics {
        focus,
        brightness,
        contrast: align,
        skew: 1.0 - align,
        overall: focus * WEIGHT_FOCUS + brightness * WEIGHT_BRIGHTNESS + align * WEIGHT_ALIGNMENT,
        issues,
        recommendations,
    }
}

/// Whether this frame is good enough to capture. Every predicate must hold.
pub fn can_capture(
    metrics: &QualityMetrics,
    alignment: &AlignmentStatus,
    thresholds: &QualityThresholds,
) -> bool {
    metrics.focus >= thresholds.min_focus
        && metrics.brightness >= thresholds.min_brightness
        && metrics.brightness <= thresholds.max_brightness
        && alignment.paper_detected
        && alignment.detected_markers >= alignment.required_markers
        && alignment.alignment >= thresholds.capture_alignment
}
