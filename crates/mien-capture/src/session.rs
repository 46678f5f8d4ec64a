//! Capture session state machine.
//!
//! A session walks an ordered list of [`CaptureBackend`]s with one shared
//! probe routine: open the device, pull a validation frame, then drop and
//! reopen so the source starts from a clean driver state. A streaming
//! session tolerates transient read failures; sustained failure releases
//! the source exactly once and parks the session in `Recovering` until the
//! caller asks it to reconnect.
//!
//! Sessions are `Send` but not `Sync`: one producer per device, serialized
//! by whoever owns the session.

use crate::frame::Frame;
use thiserror::Error;

/// Consecutive read failures tolerated before the source is released.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 15;
/// Single-buffer queues keep frames fresh instead of stale-but-smooth.
pub const DEFAULT_BUFFER_DEPTH: u32 = 1;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("open failed: {0}")]
    OpenFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// Requested capture configuration. Backends treat these as hints and may
/// negotiate something close instead.
#[derive(Debug, Clone, Copy)]
pub struct CaptureHints {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffers: u32,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            fps: DEFAULT_FPS,
            buffers: DEFAULT_BUFFER_DEPTH,
        }
    }
}

/// An open device handle that can produce frames.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// A capture driver that can open a device by index.
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;
    fn open(&self, index: u32, hints: CaptureHints) -> Result<Box<dyn VideoSource>, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Streaming,
    Recovering,
}

/// Resilient capture session over an ordered backend list.
pub struct CaptureSession {
    backends: Vec<Box<dyn CaptureBackend>>,
    index: u32,
    hints: CaptureHints,
    source: Option<Box<dyn VideoSource>>,
    active_backend: Option<String>,
    state: SessionState,
    consecutive_failures: u32,
}

impl CaptureSession {
    pub fn new(backends: Vec<Box<dyn CaptureBackend>>, index: u32) -> Self {
        Self::with_hints(backends, index, CaptureHints::default())
    }

    pub fn with_hints(
        backends: Vec<Box<dyn CaptureBackend>>,
        index: u32,
        hints: CaptureHints,
    ) -> Self {
        Self {
            backends,
            index,
            hints,
            source: None,
            active_backend: None,
            state: SessionState::Closed,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Name of the backend that currently holds the device.
    pub fn active_backend(&self) -> Option<&str> {
        self.active_backend.as_deref()
    }

    /// Try each backend in order until one produces a working source.
    ///
    /// Per backend: open, pull one validation frame, drop the handle, then
    /// reopen. The validation read weeds out drivers that enumerate a
    /// device but cannot actually stream from it. Returns `false` (state
    /// `Closed`) when every backend fails; this is an expected condition,
    /// not an error, and callers substitute placeholder frames.
    pub fn open(&mut self) -> bool {
        self.close();
        self.state = SessionState::Opening;

        for i in 0..self.backends.len() {
            match self.probe_backend(i) {
                Ok(source) => {
                    let name = self.backends[i].name().to_string();
                    tracing::info!(backend = %name, index = self.index, "capture session streaming");
                    self.source = Some(source);
                    self.active_backend = Some(name);
                    self.state = SessionState::Streaming;
                    self.consecutive_failures = 0;
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        backend = self.backends[i].name(),
                        index = self.index,
                        error = %e,
                        "capture backend rejected device"
                    );
                }
            }
        }

        tracing::warn!(index = self.index, "no capture backend could open the device");
        self.state = SessionState::Closed;
        false
    }

    fn probe_backend(&self, i: usize) -> Result<Box<dyn VideoSource>, CaptureError> {
        let backend = &self.backends[i];
        let mut trial = backend.open(self.index, self.hints)?;
        trial.read_frame()?;
        drop(trial);
        backend.open(self.index, self.hints)
    }

    /// Blocking read of the next frame.
    ///
    /// `None` means no frame this round: either the session holds no
    /// source, or the read failed. More than
    /// [`MAX_CONSECUTIVE_FAILURES`] failures in a row release the source
    /// (exactly once) and move the session to `Recovering`.
    pub fn read(&mut self) -> Option<Frame> {
        let source = self.source.as_mut()?;

        match source.read_frame() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                Some(frame)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    failures = self.consecutive_failures,
                    error = %e,
                    "frame read failed"
                );
                if self.consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(index = self.index, "releasing capture source for recovery");
                    self.source = None;
                    self.active_backend = None;
                    self.state = SessionState::Recovering;
                }
                None
            }
        }
    }

    /// Reconnect attempt out of `Recovering` (or any other state). Ends
    /// in `Streaming` on success, `Closed` otherwise.
    pub fn recover(&mut self) -> bool {
        self.open()
    }

    /// Release the device. Idempotent; safe in every state.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(index = self.index, "capture session closed");
        }
        self.active_backend = None;
        self.state = SessionState::Closed;
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBackend, ScriptedRead};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_all_backends_fail_stays_closed() {
        let backends: Vec<Box<dyn CaptureBackend>> = vec![
            Box::new(ScriptedBackend::refusing("first")),
            Box::new(ScriptedBackend::refusing("second")),
        ];
        let mut session = CaptureSession::new(backends, 0);
        assert!(!session.open());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.read().is_none());
    }

    #[test]
    fn test_open_skips_to_second_backend() {
        let backends: Vec<Box<dyn CaptureBackend>> = vec![
            Box::new(ScriptedBackend::refusing("broken")),
            Box::new(ScriptedBackend::endless("working", ScriptedRead::Solid(9))),
        ];
        let mut session = CaptureSession::new(backends, 0);
        assert!(session.open());
        assert_eq!(session.active_backend(), Some("working"));
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_open_discards_validation_frame() {
        let backend = ScriptedBackend::scripted(
            "cam",
            vec![
                ScriptedRead::Solid(10), // consumed by the validation read
                ScriptedRead::Solid(20),
            ],
        );
        let counters = backend.counters();

        let mut session = CaptureSession::new(vec![Box::new(backend)], 0);
        assert!(session.open());
        // One open for the trial, one for the kept source; the trial
        // source was dropped.
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);

        let frame = session.read().expect("frame");
        assert_eq!(frame.data[0], 20);
    }

    #[test]
    fn test_sustained_failures_release_source_once() {
        let backend = ScriptedBackend::scripted(
            "cam",
            vec![
                ScriptedRead::Solid(1), // validation
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
            ],
        );
        let counters = backend.counters();

        let mut session = CaptureSession::new(vec![Box::new(backend)], 0);
        assert!(session.open());

        for _ in 0..3 {
            assert!(session.read().is_none());
            assert_eq!(session.state(), SessionState::Streaming);
        }
        // Fourth consecutive failure crosses the threshold.
        assert!(session.read().is_none());
        assert_eq!(session.state(), SessionState::Recovering);
        // Trial source + live source, nothing more.
        assert_eq!(counters.drops.load(Ordering::SeqCst), 2);

        // Further reads are inert; no double release.
        assert!(session.read().is_none());
        assert_eq!(counters.drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_successful_read_resets_failure_count() {
        let backend = ScriptedBackend::scripted(
            "cam",
            vec![
                ScriptedRead::Solid(1), // validation
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Solid(2),
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Solid(3),
            ],
        );
        let mut session = CaptureSession::new(vec![Box::new(backend)], 0);
        assert!(session.open());

        for _ in 0..3 {
            assert!(session.read().is_none());
        }
        assert_eq!(session.read().expect("frame").data[0], 2);
        assert_eq!(session.state(), SessionState::Streaming);

        for _ in 0..3 {
            assert!(session.read().is_none());
        }
        assert_eq!(session.read().expect("frame").data[0], 3);
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_recover_after_release() {
        let backend = ScriptedBackend::endless_after(
            "cam",
            vec![
                ScriptedRead::Solid(1), // validation
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Fail,
                ScriptedRead::Solid(7), // validation of the reopen
            ],
            ScriptedRead::Solid(8),
        );
        let mut session = CaptureSession::new(vec![Box::new(backend)], 0);
        assert!(session.open());
        for _ in 0..4 {
            assert!(session.read().is_none());
        }
        assert_eq!(session.state(), SessionState::Recovering);

        assert!(session.recover());
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.read().expect("frame").data[0], 8);
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = ScriptedBackend::endless("cam", ScriptedRead::Solid(1));
        let counters = backend.counters();
        let mut session = CaptureSession::new(vec![Box::new(backend)], 0);
        assert!(session.open());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        let drops = counters.drops.load(Ordering::SeqCst);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(counters.drops.load(Ordering::SeqCst), drops);
        assert!(session.read().is_none());
    }

    #[test]
    fn test_frames_match_hint_dimensions() {
        let backend = ScriptedBackend::endless("cam", ScriptedRead::Solid(4));
        let hints = CaptureHints {
            width: 32,
            height: 24,
            ..CaptureHints::default()
        };
        let mut session = CaptureSession::with_hints(vec![Box::new(backend)], 0, hints);
        assert!(session.open());
        let frame = session.read().expect("frame");
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.data.len(), Frame::expected_len(32, 24));
    }
}
