//! The live scanning loop.
//!
//! One [`ScannerSession::tick`] per display refresh: pull a frame, hand it to
//! the analysis executor, feed any finished analysis to the controller and
//! perform the capture when the controller asks for one.

use crate::capture::{CaptureError, CaptureSink, CapturedImage};
use crate::config::ScannerConfig;
use crate::controller::{CaptureController, CaptureState, ControllerConfig, ControllerEvent};
use crate::worker::{AnalysisExecutor, Submission, WorkerError};
use omr_core::{AnswerKey, FrameAnalysis};
use omr_hw::{CameraError, Frame, FrameSource};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What the UI host sees after each tick.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    /// Latest finished analysis, if one arrived this tick.
    pub analysis: Option<FrameAnalysis>,
    pub state: CaptureState,
    pub can_capture: bool,
    pub countdown_seconds: u64,
    pub event: Option<ControllerEvent>,
    /// Set on the tick an auto capture was delivered.
    pub captured: Option<Uuid>,
    /// A capture that failed since the previous update. Scanning resumes.
    pub capture_error: Option<String>,
}

/// What [`ScannerSession::run`] should do after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    /// Manual capture; ignored unless the sheet is ready.
    CaptureNow,
    Stop,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub controller: ControllerConfig,
    pub jpeg_quality: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            jpeg_quality: 95,
        }
    }
}

impl From<&ScannerConfig> for SessionOptions {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            controller: ControllerConfig {
                auto_capture: config.auto_capture,
                auto_capture_overall: config.auto_capture_overall,
                countdown: config.countdown(),
            },
            jpeg_quality: config.jpeg_quality,
        }
    }
}

pub struct ScannerSession {
    source: Option<Box<dyn FrameSource>>,
    executor: AnalysisExecutor,
    controller: CaptureController,
    sink: Box<dyn CaptureSink>,
    key: Arc<AnswerKey>,
    jpeg_quality: u8,
    /// Frame handed to the executor whose result has not arrived yet.
    submitted: Option<Arc<Frame>>,
    /// Frame the latest analysis describes; this is what a capture freezes.
    analyzed: Option<(Arc<Frame>, FrameAnalysis)>,
    /// Failure not yet reported in an update.
    capture_error: Option<String>,
}

impl ScannerSession {
    pub fn new(
        source: Box<dyn FrameSource>,
        executor: AnalysisExecutor,
        sink: Box<dyn CaptureSink>,
        key: AnswerKey,
        options: SessionOptions,
    ) -> Self {
        Self {
            source: Some(source),
            executor,
            controller: CaptureController::new(options.controller),
            sink,
            key: Arc::new(key),
            jpeg_quality: options.jpeg_quality,
            submitted: None,
            analyzed: None,
            capture_error: None,
        }
    }

    /// Build a session with the executor and options `config` asks for.
    pub fn from_config(
        config: &ScannerConfig,
        source: Box<dyn FrameSource>,
        sink: Box<dyn CaptureSink>,
        key: AnswerKey,
    ) -> Result<Self, WorkerError> {
        let analyzer = config.analyzer();
        let executor = if config.use_worker {
            AnalysisExecutor::worker(analyzer)?
        } else {
            AnalysisExecutor::inline(analyzer)
        };
        Ok(Self::new(source, executor, sink, key, config.into()))
    }

    pub fn start(&mut self) {
        if let Some(source) = &self.source {
            tracing::info!(
                source = %source.describe(),
                worker = self.executor.is_worker(),
                questions = self.key.len(),
                "scanning started"
            );
        }
        self.controller.start();
    }

    pub fn state(&self) -> CaptureState {
        self.controller.state()
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.source.as_ref().and_then(|s| s.dimensions())
    }

    /// Advance the session by one display refresh.
    pub fn tick(&mut self, now: Instant) -> SessionUpdate {
        let mut update = SessionUpdate {
            analysis: None,
            state: self.controller.state(),
            can_capture: false,
            countdown_seconds: 0,
            event: None,
            captured: None,
            capture_error: None,
        };
        if !matches!(
            self.controller.state(),
            CaptureState::Scanning | CaptureState::ReadyToCapture
        ) {
            return self.finish_update(update, now);
        }

        if let Err(reason) = self.pull_and_submit() {
            self.controller.fail(reason);
            return self.finish_update(update, now);
        }

        update.event = match self.executor.poll() {
            Ok(Some(Ok(analysis))) => {
                let event = self.controller.observe(&analysis, now);
                update.analysis = Some(analysis.clone());
                if let Some(frame) = self.submitted.take() {
                    self.analyzed = Some((frame, analysis));
                }
                event
            }
            Ok(Some(Err(e))) => {
                self.submitted = None;
                tracing::debug!(error = %e, "skipping frame");
                self.controller.tick(now)
            }
            Ok(None) => self.controller.tick(now),
            Err(e) => {
                self.controller.fail(e.to_string());
                None
            }
        };

        if update.event == Some(ControllerEvent::AutoCapture) {
            update.captured = self.finish_capture().ok();
            // On failure finish_capture leaves the error for finish_update.
        }
        self.finish_update(update, now)
    }

    /// Returns the failure reason if the source or executor is unusable.
    fn pull_and_submit(&mut self) -> Result<(), String> {
        let Some(source) = self.source.as_mut() else {
            tracing::debug!("no frame source; tick skipped");
            return Ok(());
        };
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "frame not ready; tick skipped");
                return Ok(());
            }
            Err(e) => return Err(format!("{e} ({})", e.remediation())),
        };
        if frame.is_empty() {
            tracing::debug!(seq = frame.sequence, "empty frame; tick skipped");
            return Ok(());
        }

        let frame = Arc::new(frame);
        match self.executor.submit(Arc::clone(&frame), Arc::clone(&self.key)) {
            Ok(Submission::Submitted) => {
                self.submitted = Some(frame);
                Ok(())
            }
            Ok(Submission::Dropped) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn finish_update(&mut self, mut update: SessionUpdate, now: Instant) -> SessionUpdate {
        update.capture_error = self.capture_error.take();
        update.state = self.controller.state();
        update.can_capture = self.controller.state() == CaptureState::ReadyToCapture;
        update.countdown_seconds = self.controller.countdown_seconds(now);
        update
    }

    /// Manual capture of the frame the latest analysis describes.
    ///
    /// A failure other than [`CaptureError::NotReady`] is also reported in
    /// the next [`SessionUpdate`].
    pub fn capture_image(&mut self) -> Result<Uuid, CaptureError> {
        if !self.controller.request_capture() {
            return Err(CaptureError::NotReady);
        }
        self.finish_capture()
    }

    fn finish_capture(&mut self) -> Result<Uuid, CaptureError> {
        self.executor.discard_pending();
        self.submitted = None;

        let result = self.deliver_latest();
        self.controller.complete_capture(result.as_ref().map(|_| ()));
        if let Err(e) = &result {
            self.capture_error = Some(e.to_string());
        }
        result
    }

    fn deliver_latest(&mut self) -> Result<Uuid, CaptureError> {
        let (frame, analysis) = self.analyzed.as_ref().ok_or(CaptureError::FrameUnavailable)?;
        let image = CapturedImage::from_frame(frame, analysis.quality.clone(), self.jpeg_quality)?;
        let id = image.id;
        self.sink.deliver(image)?;
        Ok(id)
    }

    /// Stop scanning and any countdown. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if self.controller.state() != CaptureState::Idle {
            tracing::info!("scanning cancelled");
        }
        self.controller.cancel();
        self.executor.discard_pending();
        self.submitted = None;
    }

    /// Replace the frame source. The old source is dropped before `open` runs,
    /// so a camera can be reopened with different settings.
    pub fn switch_source<F>(&mut self, open: F) -> Result<(), CameraError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, CameraError>,
    {
        self.cancel();
        self.source = None;
        self.analyzed = None;
        match open() {
            Ok(source) => {
                self.source = Some(source);
                self.start();
                Ok(())
            }
            Err(e) => {
                self.controller.fail(format!("{e} ({})", e.remediation()));
                Err(e)
            }
        }
    }

    /// Tick until the session leaves the live states or `on_update` says stop.
    ///
    /// Returns the id of the image captured, if any.
    pub fn run<F>(&mut self, interval: Duration, mut on_update: F) -> Option<Uuid>
    where
        F: FnMut(&SessionUpdate) -> LoopControl,
    {
        self.start();
        let mut captured = None;
        loop {
            let update = self.tick(Instant::now());
            if update.captured.is_some() {
                captured = update.captured;
            }
            match on_update(&update) {
                LoopControl::Continue => {}
                LoopControl::CaptureNow => match self.capture_image() {
                    Ok(id) => captured = Some(id),
                    Err(CaptureError::NotReady) => tracing::debug!("manual capture refused"),
                    Err(e) => tracing::warn!(error = %e, "manual capture failed"),
                },
                LoopControl::Stop => {
                    self.cancel();
                    break;
                }
            }
            if !matches!(
                self.state(),
                CaptureState::Scanning | CaptureState::ReadyToCapture
            ) {
                break;
            }
            std::thread::sleep(interval);
        }
        captured
    }
}
