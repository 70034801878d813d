//! Capture controller: turns per-frame capture decisions into scanner state.
//!
//! ```text
//! Idle ──start──▶ Scanning ◀──gate false── ReadyToCapture ──capture──▶ Capturing
//!                    │                          ▲                        │
//!                    └────────gate true─────────┘         Ok ─▶ Idle, Err ─▶ Scanning
//! ```
//!
//! In `ReadyToCapture` a sustained high overall score starts an auto-capture
//! countdown. Time is passed in by the caller so behavior is deterministic.

use crate::capture::CaptureError;
use omr_core::FrameAnalysis;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Scanning,
    ReadyToCapture,
    Capturing,
    Error,
}

/// Something the UI host may want to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerEvent {
    Ready,
    NotReady,
    CountdownStarted,
    CountdownCancelled,
    AutoCapture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub auto_capture: bool,
    /// Overall score at or above which the countdown runs.
    pub auto_capture_overall: f32,
    pub countdown: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            auto_capture_overall: 0.9,
            countdown: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub struct CaptureController {
    config: ControllerConfig,
    state: CaptureState,
    countdown_started: Option<Instant>,
    last_error: Option<String>,
}

impl CaptureController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            countdown_started: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Reason for the last transition into [`CaptureState::Error`].
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Begin (or resume after an error) scanning.
    pub fn start(&mut self) {
        if matches!(self.state, CaptureState::Idle | CaptureState::Error) {
            self.last_error = None;
            self.countdown_started = None;
            self.set_state(CaptureState::Scanning);
        }
    }

    /// Feed one frame's analysis.
    ///
    /// Ignored unless scanning. Returns `CountdownStarted` rather than `Ready`
    /// when a frame both passes the gate and starts the countdown.
    pub fn observe(&mut self, analysis: &FrameAnalysis, now: Instant) -> Option<ControllerEvent> {
        let overall = analysis.quality.overall;
        let wants_countdown =
            self.config.auto_capture && overall >= self.config.auto_capture_overall;

        match self.state {
            CaptureState::Scanning if analysis.can_capture => {
                self.set_state(CaptureState::ReadyToCapture);
                if wants_countdown {
                    self.countdown_started = Some(now);
                    tracing::info!(overall, "auto-capture countdown started");
                    return Some(ControllerEvent::CountdownStarted);
                }
                Some(ControllerEvent::Ready)
            }
            CaptureState::ReadyToCapture if !analysis.can_capture => {
                if self.countdown_started.take().is_some() {
                    tracing::debug!("countdown cancelled; frame no longer capturable");
                }
                self.set_state(CaptureState::Scanning);
                Some(ControllerEvent::NotReady)
            }
            CaptureState::ReadyToCapture => match (self.countdown_started, wants_countdown) {
                (None, true) => {
                    self.countdown_started = Some(now);
                    tracing::info!(overall, "auto-capture countdown started");
                    Some(ControllerEvent::CountdownStarted)
                }
                (Some(_), false) => {
                    self.countdown_started = None;
                    tracing::debug!(overall, "countdown cancelled; quality dropped");
                    Some(ControllerEvent::CountdownCancelled)
                }
                _ => self.tick(now),
            },
            _ => None,
        }
    }

    /// Fire the auto capture once the countdown has run out.
    pub fn tick(&mut self, now: Instant) -> Option<ControllerEvent> {
        let started = self.countdown_started?;
        if self.state != CaptureState::ReadyToCapture {
            return None;
        }
        if now.saturating_duration_since(started) < self.config.countdown {
            return None;
        }
        self.countdown_started = None;
        self.set_state(CaptureState::Capturing);
        Some(ControllerEvent::AutoCapture)
    }

    /// Manual capture. Only allowed while the gate is open.
    pub fn request_capture(&mut self) -> bool {
        if self.state != CaptureState::ReadyToCapture {
            return false;
        }
        self.countdown_started = None;
        self.set_state(CaptureState::Capturing);
        true
    }

    /// Finish a capture started by [`tick`](Self::tick) or
    /// [`request_capture`](Self::request_capture).
    pub fn complete_capture(&mut self, result: Result<(), &CaptureError>) {
        if self.state != CaptureState::Capturing {
            return;
        }
        match result {
            Ok(()) => self.set_state(CaptureState::Idle),
            Err(e) => {
                tracing::warn!(error = %e, "capture failed; resuming scan");
                self.set_state(CaptureState::Scanning);
            }
        }
    }

    /// Device failure: stop until [`start`](Self::start) is called again.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "scanner error");
        self.countdown_started = None;
        self.last_error = Some(reason);
        self.set_state(CaptureState::Error);
    }

    /// Stop scanning and drop any countdown. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        self.countdown_started = None;
        self.set_state(CaptureState::Idle);
    }

    pub fn is_countdown_active(&self) -> bool {
        self.countdown_started.is_some()
    }

    /// Whole seconds left on the countdown, rounded up; 0 when none runs.
    pub fn countdown_seconds(&self, now: Instant) -> u64 {
        let Some(started) = self.countdown_started else {
            return 0;
        };
        let remaining = self
            .config
            .countdown
            .saturating_sub(now.saturating_duration_since(started));
        remaining.as_millis().div_ceil(1000) as u64
    }

    fn set_state(&mut self, next: CaptureState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "capture state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omr_core::{AlignmentStatus, QualityMetrics};

    fn analysis(can_capture: bool, overall: f32) -> FrameAnalysis {
        FrameAnalysis {
            quality: QualityMetrics {
                focus: overall,
                brightness: 0.5,
                contrast: 1.0,
                skew: 0.0,
                overall,
                issues: Vec::new(),
                recommendations: Vec::new(),
            },
            alignment: AlignmentStatus::not_found(3),
            bubbles: Vec::new(),
            can_capture,
        }
    }

    fn scanning() -> CaptureController {
        let mut c = CaptureController::new(ControllerConfig::default());
        c.start();
        c
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_start_and_gate_transitions() {
        let mut c = CaptureController::new(ControllerConfig::default());
        let t0 = Instant::now();
        assert_eq!(c.state(), CaptureState::Idle);
        assert_eq!(c.observe(&analysis(true, 0.95), t0), None);

        c.start();
        assert_eq!(c.state(), CaptureState::Scanning);
        assert_eq!(c.observe(&analysis(false, 0.4), t0), None);
        assert_eq!(
            c.observe(&analysis(true, 0.85), t0),
            Some(ControllerEvent::Ready)
        );
        assert_eq!(c.state(), CaptureState::ReadyToCapture);
        assert!(!c.is_countdown_active());
        assert_eq!(
            c.observe(&analysis(false, 0.85), t0),
            Some(ControllerEvent::NotReady)
        );
        assert_eq!(c.state(), CaptureState::Scanning);
    }

    #[test]
    fn test_countdown_fires_auto_capture() {
        let mut c = scanning();
        let t0 = Instant::now();
        assert_eq!(
            c.observe(&analysis(true, 0.95), t0),
            Some(ControllerEvent::CountdownStarted)
        );
        assert_eq!(c.countdown_seconds(t0), 3);
        assert_eq!(c.countdown_seconds(t0 + secs(0.5)), 3);
        assert_eq!(c.countdown_seconds(t0 + secs(2.1)), 1);

        assert_eq!(c.observe(&analysis(true, 0.95), t0 + secs(1.0)), None);
        assert_eq!(c.tick(t0 + secs(2.9)), None);
        assert_eq!(c.tick(t0 + secs(3.0)), Some(ControllerEvent::AutoCapture));
        assert_eq!(c.state(), CaptureState::Capturing);
        assert_eq!(c.countdown_seconds(t0 + secs(3.0)), 0);
    }

    #[test]
    fn test_observe_can_fire_elapsed_countdown() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.95), t0);
        assert_eq!(
            c.observe(&analysis(true, 0.93), t0 + secs(3.5)),
            Some(ControllerEvent::AutoCapture)
        );
    }

    #[test]
    fn test_quality_drop_cancels_countdown_but_stays_ready() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.95), t0);
        assert_eq!(
            c.observe(&analysis(true, 0.8), t0 + secs(1.0)),
            Some(ControllerEvent::CountdownCancelled)
        );
        assert_eq!(c.state(), CaptureState::ReadyToCapture);
        assert_eq!(c.countdown_seconds(t0 + secs(1.0)), 0);
        // Original deadline passes without a capture
        assert_eq!(c.tick(t0 + secs(4.0)), None);
        assert_eq!(c.state(), CaptureState::ReadyToCapture);

        // Quality recovers: a fresh countdown starts from now
        let t1 = t0 + secs(5.0);
        assert_eq!(
            c.observe(&analysis(true, 0.92), t1),
            Some(ControllerEvent::CountdownStarted)
        );
        assert_eq!(c.tick(t1 + secs(2.0)), None);
        assert_eq!(c.tick(t1 + secs(3.0)), Some(ControllerEvent::AutoCapture));
    }

    #[test]
    fn test_gate_drop_cancels_countdown() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.95), t0);
        assert_eq!(
            c.observe(&analysis(false, 0.95), t0 + secs(1.0)),
            Some(ControllerEvent::NotReady)
        );
        assert!(!c.is_countdown_active());
        assert_eq!(c.tick(t0 + secs(10.0)), None);
        assert_eq!(c.state(), CaptureState::Scanning);
    }

    #[test]
    fn test_auto_capture_disabled() {
        let mut c = CaptureController::new(ControllerConfig {
            auto_capture: false,
            ..ControllerConfig::default()
        });
        c.start();
        let t0 = Instant::now();
        assert_eq!(
            c.observe(&analysis(true, 1.0), t0),
            Some(ControllerEvent::Ready)
        );
        assert_eq!(c.tick(t0 + secs(60.0)), None);
        assert!(c.request_capture());
    }

    #[test]
    fn test_manual_capture_only_when_ready() {
        let mut c = scanning();
        assert!(!c.request_capture());
        c.observe(&analysis(true, 0.8), Instant::now());
        assert!(c.request_capture());
        assert_eq!(c.state(), CaptureState::Capturing);
        assert!(!c.request_capture());
    }

    #[test]
    fn test_capturing_ignores_observations() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.8), t0);
        c.request_capture();
        assert_eq!(c.observe(&analysis(false, 0.1), t0), None);
        assert_eq!(c.state(), CaptureState::Capturing);
    }

    #[test]
    fn test_complete_capture_outcomes() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.8), t0);
        c.request_capture();
        c.complete_capture(Ok(()));
        assert_eq!(c.state(), CaptureState::Idle);

        c.start();
        c.observe(&analysis(true, 0.8), t0);
        c.request_capture();
        c.complete_capture(Err(&CaptureError::FrameUnavailable));
        assert_eq!(c.state(), CaptureState::Scanning);

        // Not capturing: no effect
        c.complete_capture(Ok(()));
        assert_eq!(c.state(), CaptureState::Scanning);
    }

    #[test]
    fn test_fail_and_restart() {
        let mut c = scanning();
        c.observe(&analysis(true, 0.95), Instant::now());
        c.fail("camera unplugged");
        assert_eq!(c.state(), CaptureState::Error);
        assert_eq!(c.last_error(), Some("camera unplugged"));
        assert!(!c.is_countdown_active());
        assert_eq!(c.observe(&analysis(true, 0.95), Instant::now()), None);

        c.start();
        assert_eq!(c.state(), CaptureState::Scanning);
        assert_eq!(c.last_error(), None);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut c = scanning();
        let t0 = Instant::now();
        c.observe(&analysis(true, 0.95), t0);
        c.cancel();
        assert_eq!(c.state(), CaptureState::Idle);
        assert_eq!(c.countdown_seconds(t0), 0);
        c.cancel();
        assert_eq!(c.state(), CaptureState::Idle);
        assert_eq!(c.tick(t0 + secs(5.0)), None);
    }
}
