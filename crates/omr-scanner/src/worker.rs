//! Background frame analysis.
//!
//! One dedicated OS thread owns a [`FrameAnalyzer`] and serves requests from
//! a bounded channel. The handle keeps at most one request in flight: frames
//! submitted while a result is pending are dropped, so a slow pass never
//! builds a backlog behind the live view.

use omr_core::{AnalysisError, AnswerKey, FrameAnalysis, FrameAnalyzer};
use omr_hw::Frame;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// Outcome of one analysis pass.
pub type AnalysisOutcome = Result<FrameAnalysis, AnalysisError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn analysis thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("analysis thread exited")]
    Disconnected,
}

/// Whether a frame was handed to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Submitted,
    /// A previous frame is still being analyzed.
    Dropped,
}

struct AnalysisRequest {
    frame: Arc<Frame>,
    key: Arc<AnswerKey>,
    reply: oneshot::Sender<AnalysisOutcome>,
}

/// Handle to the analysis thread. Dropping it stops and joins the thread.
pub struct AnalysisWorker {
    tx: Option<mpsc::Sender<AnalysisRequest>>,
    pending: Option<oneshot::Receiver<AnalysisOutcome>>,
    /// A request whose result was abandoned but which the thread may still be
    /// running. Counts as in flight until it resolves.
    discarded: Option<oneshot::Receiver<AnalysisOutcome>>,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// Spawn the analysis thread.
    pub fn spawn(analyzer: FrameAnalyzer) -> Result<Self, WorkerError> {
        let (tx, mut rx) = mpsc::channel::<AnalysisRequest>(1);

        let thread = std::thread::Builder::new()
            .name("omr-analysis".into())
            .spawn(move || {
                tracing::info!("analysis worker started");
                while let Some(req) = rx.blocking_recv() {
                    let result = analyzer.analyze(
                        &req.frame.data,
                        req.frame.width,
                        req.frame.height,
                        Frame::CHANNELS,
                        &req.key,
                    );
                    // Receiver gone means the session moved on; nothing to do.
                    let _ = req.reply.send(result);
                }
                tracing::info!("analysis worker exiting");
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            tx: Some(tx),
            pending: None,
            discarded: None,
            thread: Some(thread),
        })
    }

    /// Hand a frame to the worker unless one is already in flight.
    pub fn try_submit(
        &mut self,
        frame: Arc<Frame>,
        key: Arc<AnswerKey>,
    ) -> Result<Submission, WorkerError> {
        if self.pending.is_some() || self.discarded_in_flight() {
            tracing::trace!(seq = frame.sequence, "analysis busy; frame dropped");
            return Ok(Submission::Dropped);
        }
        let tx = self.tx.as_ref().ok_or(WorkerError::Disconnected)?;

        let (reply, rx) = oneshot::channel();
        match tx.try_send(AnalysisRequest { frame, key, reply }) {
            Ok(()) => {
                self.pending = Some(rx);
                Ok(Submission::Submitted)
            }
            Err(TrySendError::Full(_)) => Ok(Submission::Dropped),
            Err(TrySendError::Closed(_)) => Err(WorkerError::Disconnected),
        }
    }

    /// Take the pending result if it is ready, without blocking.
    pub fn try_take(&mut self) -> Result<Option<AnalysisOutcome>, WorkerError> {
        let Some(rx) = self.pending.as_mut() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(result) => {
                self.pending = None;
                Ok(Some(result))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => {
                self.pending = None;
                Err(WorkerError::Disconnected)
            }
        }
    }

    /// Block until the pending result arrives. `None` if nothing is in flight.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(&mut self) -> Result<Option<AnalysisOutcome>, WorkerError> {
        let Some(rx) = self.pending.take() else {
            return Ok(None);
        };
        rx.blocking_recv()
            .map(Some)
            .map_err(|_| WorkerError::Disconnected)
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.discarded.is_some()
    }

    /// Abandon the pending result. The next submission is still refused
    /// until the thread has finished that pass.
    pub fn discard(&mut self) {
        if let Some(rx) = self.pending.take() {
            self.discarded = Some(rx);
        }
    }

    fn discarded_in_flight(&mut self) -> bool {
        let Some(rx) = self.discarded.as_mut() else {
            return false;
        };
        if matches!(rx.try_recv(), Err(TryRecvError::Empty)) {
            return true;
        }
        self.discarded = None;
        false
    }

    /// Close the channel and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.pending = None;
        self.discarded = None;
        // Closing the sender ends the thread's receive loop.
        self.tx = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("analysis worker panicked");
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Where analysis runs. Both variants use the same [`FrameAnalyzer`].
pub enum AnalysisExecutor {
    /// On the calling thread; the result is ready as soon as a frame is submitted.
    Inline {
        analyzer: FrameAnalyzer,
        ready: Option<AnalysisOutcome>,
    },
    Worker(AnalysisWorker),
}

impl AnalysisExecutor {
    pub fn inline(analyzer: FrameAnalyzer) -> Self {
        Self::Inline {
            analyzer,
            ready: None,
        }
    }

    pub fn worker(analyzer: FrameAnalyzer) -> Result<Self, WorkerError> {
        AnalysisWorker::spawn(analyzer).map(Self::Worker)
    }

    pub fn submit(
        &mut self,
        frame: Arc<Frame>,
        key: Arc<AnswerKey>,
    ) -> Result<Submission, WorkerError> {
        match self {
            Self::Inline { analyzer, ready } => {
                if ready.is_some() {
                    return Ok(Submission::Dropped);
                }
                *ready = Some(analyzer.analyze(
                    &frame.data,
                    frame.width,
                    frame.height,
                    Frame::CHANNELS,
                    &key,
                ));
                Ok(Submission::Submitted)
            }
            Self::Worker(worker) => worker.try_submit(frame, key),
        }
    }

    /// Next finished result, if any.
    pub fn poll(&mut self) -> Result<Option<AnalysisOutcome>, WorkerError> {
        match self {
            Self::Inline { ready, .. } => Ok(ready.take()),
            Self::Worker(worker) => worker.try_take(),
        }
    }

    /// Drop any result that has not been collected.
    pub fn discard_pending(&mut self) {
        match self {
            Self::Inline { ready, .. } => *ready = None,
            Self::Worker(worker) => worker.discard(),
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, Self::Worker(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omr_core::synthetic::{render_sheet, SheetSpec};
    use omr_core::{AnalysisConfig, MarkerLayout};

    fn analyzer() -> FrameAnalyzer {
        FrameAnalyzer::new(AnalysisConfig::default(), MarkerLayout::four_corner(0.1))
    }

    fn sheet_frame(seq: u32) -> Arc<Frame> {
        let a = analyzer();
        let spec = SheetSpec::default();
        let rgba = render_sheet(&spec, a.layout(), &a.config().bubbles);
        Arc::new(Frame::from_rgba(rgba, spec.width, spec.height, seq))
    }

    fn key() -> Arc<AnswerKey> {
        Arc::new(AnswerKey::parse_list("A,B,C").unwrap())
    }

    #[test]
    fn test_worker_matches_inline() {
        let frame = sheet_frame(0);
        let inline = analyzer()
            .analyze(&frame.data, frame.width, frame.height, 4, &key())
            .unwrap();

        let mut worker = AnalysisWorker::spawn(analyzer()).unwrap();
        assert_eq!(
            worker.try_submit(frame, key()).unwrap(),
            Submission::Submitted
        );
        let from_worker = worker.wait().unwrap().unwrap().unwrap();
        assert_eq!(from_worker, inline);
        assert!(from_worker.can_capture);
    }

    #[test]
    fn test_second_submit_dropped_while_in_flight() {
        let mut worker = AnalysisWorker::spawn(analyzer()).unwrap();
        assert_eq!(
            worker.try_submit(sheet_frame(0), key()).unwrap(),
            Submission::Submitted
        );
        assert!(worker.is_busy());
        assert_eq!(
            worker.try_submit(sheet_frame(1), key()).unwrap(),
            Submission::Dropped
        );

        assert!(worker.wait().unwrap().is_some());
        assert!(!worker.is_busy());
        assert_eq!(
            worker.try_submit(sheet_frame(2), key()).unwrap(),
            Submission::Submitted
        );
        worker.shutdown();
    }

    #[test]
    fn test_try_take_eventually_yields() {
        let mut worker = AnalysisWorker::spawn(analyzer()).unwrap();
        assert!(worker.try_take().unwrap().is_none());
        worker.try_submit(sheet_frame(0), key()).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let result = loop {
            if let Some(r) = worker.try_take().unwrap() {
                break r;
            }
            assert!(std::time::Instant::now() < deadline, "worker never replied");
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        assert!(result.is_ok());
        assert!(worker.try_take().unwrap().is_none());
    }

    #[test]
    fn test_worker_reports_empty_frame() {
        let mut worker = AnalysisWorker::spawn(analyzer()).unwrap();
        worker
            .try_submit(Arc::new(Frame::from_rgba(Vec::new(), 0, 0, 0)), key())
            .unwrap();
        let result = worker.wait().unwrap().unwrap();
        assert!(matches!(result, Err(AnalysisError::EmptyFrame { .. })));
    }

    #[test]
    fn test_inline_executor_holds_one_result() {
        let mut exec = AnalysisExecutor::inline(analyzer());
        assert!(!exec.is_worker());
        assert_eq!(
            exec.submit(sheet_frame(0), key()).unwrap(),
            Submission::Submitted
        );
        assert_eq!(
            exec.submit(sheet_frame(1), key()).unwrap(),
            Submission::Dropped
        );
        assert!(exec.poll().unwrap().unwrap().is_ok());
        assert!(exec.poll().unwrap().is_none());
    }

    #[test]
    fn test_discarded_request_still_blocks_submission() {
        let slow = FrameAnalyzer::new(
            AnalysisConfig {
                sample_stride: 1,
                brightness_step: 1,
                ..AnalysisConfig::default()
            },
            MarkerLayout::four_corner(0.1),
        );
        let (w, h) = (3000u32, 2000u32);
        let big = Arc::new(Frame::from_rgba(
            [200u8, 200, 200, 255].repeat((w * h) as usize),
            w,
            h,
            0,
        ));

        let mut exec = AnalysisExecutor::worker(slow).unwrap();
        assert_eq!(exec.submit(big.clone(), key()).unwrap(), Submission::Submitted);
        exec.discard_pending();
        assert!(exec.poll().unwrap().is_none());
        assert_eq!(exec.submit(big.clone(), key()).unwrap(), Submission::Dropped);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(60);
        while exec.submit(sheet_frame(1), key()).unwrap() == Submission::Dropped {
            assert!(std::time::Instant::now() < deadline, "discarded pass never finished");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let AnalysisExecutor::Worker(worker) = &mut exec else {
            panic!("expected a worker executor");
        };
        assert!(worker.is_busy());
        assert!(worker.wait().unwrap().unwrap().is_ok());
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_drop_joins_thread() {
        let mut worker = AnalysisWorker::spawn(analyzer()).unwrap();
        worker.try_submit(sheet_frame(0), key()).unwrap();
        // Dropping with a request in flight must not hang.
        drop(worker);
    }
}
