//! omr-core — Per-frame analysis for OMR answer sheet capture.
//!
//! Pure functions over pixel buffers: grayscale sampling, focus and
//! brightness estimation, registration mark detection, advisory bubble
//! fill scanning and the quality gate that decides when a frame is good
//! enough to capture.

pub mod analyzer;
pub mod brightness;
pub mod bubbles;
pub mod config;
pub mod focus;
pub mod grading;
pub mod grayscale;
pub mod quality;
pub mod registration;
pub mod synthetic;
pub mod types;

pub use analyzer::{AnalysisError, FrameAnalyzer};
pub use config::AnalysisConfig;
pub use grading::{Answer, AnswerKey, Choice};
pub use registration::{LayoutKind, MarkerLayout};
pub use types::{
    AlignmentStatus, Corner, DetectedBubble, FrameAnalysis, GrayscaleBuffer, QualityIssue,
    QualityMetrics,
};
