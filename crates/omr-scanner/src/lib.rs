//! omr-scanner — Live capture runtime for OMR answer sheets.
//!
//! Wires a [`omr_hw::FrameSource`] to the per-frame analyzer from `omr-core`,
//! drives the capture controller from the results, and delivers the frozen
//! frame to a [`CaptureSink`] when the sheet is ready.

pub mod capture;
pub mod config;
pub mod controller;
pub mod session;
pub mod worker;

pub use capture::{CaptureError, CaptureSink, CapturedImage, DirectorySink, MemorySink};
pub use config::{ConfigError, ScannerConfig};
pub use controller::{CaptureController, CaptureState, ControllerConfig, ControllerEvent};
pub use session::{LoopControl, ScannerSession, SessionOptions, SessionUpdate};
pub use worker::{AnalysisExecutor, AnalysisWorker, Submission, WorkerError};
