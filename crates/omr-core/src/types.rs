use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-channel luminance buffer sampled from a source frame.
///
/// `width` and `height` are the sampled dimensions; `stride` is the step in
/// source pixels between adjacent samples, so sample `(x, y)` came from source
/// pixel `(x * stride, y * stride)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayscaleBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Dimensions of the frame the samples were taken from.
    pub source_width: u32,
    pub source_height: u32,
}

impl GrayscaleBuffer {
    /// Sample at `(x, y)` in sampled coordinates, or `None` outside the buffer.
    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Map a source-pixel point onto the sampled grid. Points further than
    /// `margin` samples outside the buffer are pulled in to just beyond that
    /// margin, so a window of half-side `margin` around them stays empty.
    /// NaN maps to the low edge.
    pub fn to_sampled(&self, x: f32, y: f32, margin: i64) -> (i64, i64) {
        let stride = self.stride.max(1) as f64;
        let axis = |v: f32, len: u32| {
            let lo = -margin - 1;
            let hi = len as i64 + margin;
            let s = (v as f64 / stride).round();
            if s.is_nan() {
                lo
            } else {
                s.clamp(lo as f64, hi as f64) as i64
            }
        };
        (axis(x, self.width), axis(y, self.height))
    }

    /// Largest window half-side worth sampling: one that covers the whole buffer.
    pub fn max_extent(&self) -> i64 {
        self.width.max(self.height) as i64
    }

    /// Buffer with `stride` 1, where source and sampled dimensions coincide.
    pub fn full_resolution(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride: 1,
            source_width: width,
            source_height: height,
        }
    }
}

/// One registration mark search result, in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
    pub detected: bool,
    pub name: String,
    /// Fraction of dark samples inside the search window.
    pub dark_ratio: f32,
}

/// Paper registration state for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStatus {
    pub paper_detected: bool,
    pub within_frame: bool,
    /// `detected_markers / corners.len()`, in [0, 1].
    pub alignment: f32,
    pub detected_markers: usize,
    pub required_markers: usize,
    pub corners: Vec<Corner>,
}

impl AlignmentStatus {
    /// Status for a frame where nothing could be sampled.
    pub fn not_found(required_markers: usize) -> Self {
        Self {
            paper_detected: false,
            within_frame: false,
            alignment: 0.0,
            detected_markers: 0,
            required_markers,
            corners: Vec::new(),
        }
    }
}

/// Advisory fill estimate for one candidate bubble. Never used for grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedBubble {
    pub x: f32,
    pub y: f32,
    pub option: char,
    /// 1-based question number.
    pub question_number: usize,
    pub is_filled: bool,
    pub fill_ratio: f32,
    pub confidence: f32,
}

/// A threshold breach reported to the user, with its paired recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    NotSharp,
    TooDark,
    TooBright,
    PaperNotFound,
    Skewed,
}

impl QualityIssue {
    pub fn recommendation(&self) -> &'static str {
        match self {
            QualityIssue::NotSharp => "move closer / refocus",
            QualityIssue::TooDark => "add more light",
            QualityIssue::TooBright => "reduce glare or move away from direct light",
            QualityIssue::PaperNotFound => "place the whole answer sheet inside the frame",
            QualityIssue::Skewed => "hold the camera parallel to the sheet",
        }
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            QualityIssue::NotSharp => "image not sharp",
            QualityIssue::TooDark => "too dark",
            QualityIssue::TooBright => "too bright",
            QualityIssue::PaperNotFound => "paper not found",
            QualityIssue::Skewed => "paper skewed",
        };
        f.write_str(msg)
    }
}

/// Aggregated capture quality for one frame. All scores are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub focus: f32,
    pub brightness: f32,
    /// Proxy: the registration alignment score.
    pub contrast: f32,
    /// Proxy: `1 - alignment`.
    pub skew: f32,
    pub overall: f32,
    pub issues: Vec<QualityIssue>,
    pub recommendations: Vec<String>,
}

/// Everything the live overlay needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub quality: QualityMetrics,
    pub alignment: AlignmentStatus,
    pub bubbles: Vec<DetectedBubble>,
    pub can_capture: bool,
}
