//! Single-frame analysis pipeline.
//!
//! grayscale → {focus, brightness, registration} → bubbles → quality → gate.
//! The same [`FrameAnalyzer`] is used inline and from the background worker.

use crate::brightness::estimate_brightness;
use crate::bubbles::scan_bubbles;
use crate::config::AnalysisConfig;
use crate::focus::estimate_focus;
use crate::grading::AnswerKey;
use crate::grayscale::to_grayscale;
use crate::quality::{aggregate, can_capture};
use crate::registration::{detect_registration, MarkerLayout};
use crate::types::FrameAnalysis;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    /// Typically a camera still warming up; skip the tick.
    #[error("empty frame ({width}x{height}, {len} bytes)")]
    EmptyFrame { width: u32, height: u32, len: usize },
}

/// Stateless analyzer: identical input always yields identical output.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    config: AnalysisConfig,
    layout: MarkerLayout,
}

impl FrameAnalyzer {
    pub fn new(config: AnalysisConfig, layout: MarkerLayout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn layout(&self) -> &MarkerLayout {
        &self.layout
    }

    /// Analyze one interleaved pixel buffer.
    pub fn analyze(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: usize,
        key: &AnswerKey,
    ) -> Result<FrameAnalysis, AnalysisError> {
        if width == 0 || height == 0 || pixels.is_empty() {
            return Err(AnalysisError::EmptyFrame {
                width,
                height,
                len: pixels.len(),
            });
        }

        let start = Instant::now();
        let cfg = &self.config;

        let gray = to_grayscale(pixels, width, height, channels, cfg.sample_stride);
        let focus = estimate_focus(&gray, &cfg.focus);
        let brightness = estimate_brightness(&gray, cfg.brightness_step);
        let alignment = detect_registration(&gray, &self.layout, &cfg.registration);
        let bubbles = scan_bubbles(&gray, key, &alignment, &cfg.bubbles);
        let quality = aggregate(focus, brightness, &alignment, &cfg.thresholds);
        let ready = can_capture(&quality, &alignment, &cfg.thresholds);

        let elapsed = start.elapsed();
        tracing::debug!(
            focus,
            brightness,
            alignment = alignment.alignment,
            markers = alignment.detected_markers,
            overall = quality.overall,
            can_capture = ready,
            elapsed_us = elapsed.as_micros() as u64,
            "frame analyzed"
        );
        if elapsed > Duration::from_millis(cfg.frame_budget_ms) {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = cfg.frame_budget_ms,
                width,
                height,
                "frame analysis over budget; consider a larger sample stride"
            );
        }

        Ok(FrameAnalysis {
            quality,
            alignment,
            bubbles,
            can_capture: ready,
        })
    }
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default(), MarkerLayout::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{render_sheet, SheetSpec};
    use crate::types::QualityIssue;

    fn analyzer() -> FrameAnalyzer {
        FrameAnalyzer::new(AnalysisConfig::default(), MarkerLayout::four_corner(0.1))
    }

    fn sheet(spec: &SheetSpec, a: &FrameAnalyzer) -> Vec<u8> {
        render_sheet(spec, a.layout(), &a.config().bubbles)
    }

    #[test]
    fn test_well_lit_sheet_is_capturable() {
        let a = analyzer();
        let spec = SheetSpec::default();
        let rgba = sheet(&spec, &a);
        let key = AnswerKey::parse_list("A,B,C,D").unwrap();

        let result = a.analyze(&rgba, spec.width, spec.height, 4, &key).unwrap();
        assert!(result.alignment.paper_detected);
        assert_eq!(result.alignment.alignment, 1.0);
        assert!(result.quality.focus >= 0.7, "focus={}", result.quality.focus);
        assert!(
            (0.3..=0.8).contains(&result.quality.brightness),
            "brightness={}",
            result.quality.brightness
        );
        assert!(result.quality.issues.is_empty(), "{:?}", result.quality.issues);
        assert!(result.can_capture);
        assert_eq!(result.bubbles.len(), 4 * 4);
    }

    #[test]
    fn test_dark_sheet_is_not_capturable() {
        let a = analyzer();
        let spec = SheetSpec::default().lit(0.2);
        let rgba = sheet(&spec, &a);

        let result = a.analyze(&rgba, spec.width, spec.height, 4, &AnswerKey::default()).unwrap();
        assert!(result.quality.brightness < 0.3);
        assert!(result.quality.issues.contains(&QualityIssue::TooDark));
        assert!(!result.can_capture);
    }

    #[test]
    fn test_filled_bubble_reported() {
        let a = analyzer();
        let spec = SheetSpec {
            filled: vec![(0, 1)],
            questions: 3,
            ..SheetSpec::default()
        };
        let rgba = sheet(&spec, &a);
        let key = AnswerKey::parse_list("B,A,C").unwrap();

        let result = a.analyze(&rgba, spec.width, spec.height, 4, &key).unwrap();
        let filled: Vec<_> = result.bubbles.iter().filter(|b| b.is_filled).collect();
        assert_eq!(filled.len(), 1);
        assert_eq!((filled[0].question_number, filled[0].option), (1, 'B'));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let a = analyzer();
        let err = a.analyze(&[], 0, 0, 4, &AnswerKey::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyFrame { .. }));
        assert!(a.analyze(&[1, 2, 3, 4], 0, 1, 4, &AnswerKey::default()).is_err());
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let a = analyzer();
        let spec = SheetSpec {
            marker_count: 3,
            ..SheetSpec::default()
        };
        let rgba = sheet(&spec, &a);
        let key = AnswerKey::parse_list("A,B,C,D,E").unwrap();

        let first = a.analyze(&rgba, spec.width, spec.height, 4, &key).unwrap();
        let second = a.analyze(&rgba, spec.width, spec.height, 4, &key).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.quality.overall.to_bits(), second.quality.overall.to_bits());
    }

    #[test]
    fn test_odd_dimensions_do_not_panic() {
        let a = analyzer();
        let rgba = vec![200u8; 7 * 5 * 4];
        let result = a.analyze(&rgba, 7, 5, 4, &AnswerKey::default()).unwrap();
        assert_eq!(result.quality.focus, 0.0);
        assert!(!result.can_capture);
        // Buffer shorter than the claimed size
        assert!(a.analyze(&rgba, 640, 480, 4, &AnswerKey::default()).is_ok());
    }
}
