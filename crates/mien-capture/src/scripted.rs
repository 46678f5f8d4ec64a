//! In-memory capture backend driven by a scripted read plan.
//!
//! Stands in for a real camera in tests and demos: reads pop outcomes off
//! a shared queue, so failure injection and recovery sequences are exact.
//! The queue is shared between reopens of the same backend, which is what
//! lets a single script span a release-and-recover cycle.

use crate::frame::Frame;
use crate::session::{CaptureBackend, CaptureError, CaptureHints, VideoSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted read outcome.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedRead {
    /// A frame filled with a single value on all channels.
    Solid(u8),
    /// A frame with per-pixel variation (enough variance to survive
    /// detector normalization).
    Textured,
    /// A failed read.
    Fail,
}

/// Open/drop counters observable from tests.
#[derive(Debug, Default)]
pub struct ScriptedCounters {
    pub opens: AtomicUsize,
    pub drops: AtomicUsize,
}

/// Scripted capture backend.
pub struct ScriptedBackend {
    label: String,
    refuse_open: bool,
    script: Arc<Mutex<VecDeque<ScriptedRead>>>,
    /// Outcome produced once the script runs dry; `None` means reads fail.
    fallback: Option<ScriptedRead>,
    counters: Arc<ScriptedCounters>,
    sequence: Arc<AtomicU32>,
}

impl ScriptedBackend {
    /// Backend whose every `open` fails.
    pub fn refusing(label: &str) -> Self {
        Self::build(label, true, Vec::new(), None)
    }

    /// Backend producing the same outcome forever.
    pub fn endless(label: &str, fallback: ScriptedRead) -> Self {
        Self::build(label, false, Vec::new(), Some(fallback))
    }

    /// Backend playing `steps` in order, then failing every read.
    pub fn scripted(label: &str, steps: Vec<ScriptedRead>) -> Self {
        Self::build(label, false, steps, None)
    }

    /// Backend playing `steps` in order, then producing `fallback` forever.
    pub fn endless_after(label: &str, steps: Vec<ScriptedRead>, fallback: ScriptedRead) -> Self {
        Self::build(label, false, steps, Some(fallback))
    }

    fn build(
        label: &str,
        refuse_open: bool,
        steps: Vec<ScriptedRead>,
        fallback: Option<ScriptedRead>,
    ) -> Self {
        Self {
            label: label.to_string(),
            refuse_open,
            script: Arc::new(Mutex::new(steps.into())),
            fallback,
            counters: Arc::new(ScriptedCounters::default()),
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn counters(&self) -> Arc<ScriptedCounters> {
        Arc::clone(&self.counters)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn open(&self, index: u32, hints: CaptureHints) -> Result<Box<dyn VideoSource>, CaptureError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse_open {
            return Err(CaptureError::DeviceNotFound(format!(
                "{}:{index} (scripted refusal)",
                self.label
            )));
        }
        Ok(Box::new(ScriptedSource {
            script: Arc::clone(&self.script),
            fallback: self.fallback,
            counters: Arc::clone(&self.counters),
            sequence: Arc::clone(&self.sequence),
            hints,
        }))
    }
}

struct ScriptedSource {
    script: Arc<Mutex<VecDeque<ScriptedRead>>>,
    fallback: Option<ScriptedRead>,
    counters: Arc<ScriptedCounters>,
    sequence: Arc<AtomicU32>,
    hints: CaptureHints,
}

impl ScriptedSource {
    fn make_frame(&self, step: ScriptedRead) -> Result<Frame, CaptureError> {
        let (w, h) = (self.hints.width, self.hints.height);
        let data = match step {
            ScriptedRead::Solid(v) => vec![v; Frame::expected_len(w, h)],
            ScriptedRead::Textured => {
                let mut data = Vec::with_capacity(Frame::expected_len(w, h));
                for y in 0..h {
                    for x in 0..w {
                        let v = ((x ^ y) & 0xFF) as u8;
                        data.extend_from_slice(&[v, v, v]);
                    }
                }
                data
            }
            ScriptedRead::Fail => {
                return Err(CaptureError::ReadFailed("scripted failure".into()));
            }
        };
        Ok(Frame {
            data,
            width: w,
            height: h,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        })
    }
}

impl VideoSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let step = self.script.lock().map_or(None, |mut q| q.pop_front());
        match step.or(self.fallback) {
            Some(step) => self.make_frame(step),
            None => Err(CaptureError::ReadFailed("script exhausted".into())),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.counters.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_hints() -> CaptureHints {
        CaptureHints {
            width: 8,
            height: 8,
            ..CaptureHints::default()
        }
    }

    #[test]
    fn test_script_plays_in_order() {
        let backend = ScriptedBackend::scripted(
            "cam",
            vec![ScriptedRead::Solid(1), ScriptedRead::Fail, ScriptedRead::Solid(3)],
        );
        let mut source = backend.open(0, small_hints()).unwrap();
        assert_eq!(source.read_frame().unwrap().data[0], 1);
        assert!(source.read_frame().is_err());
        assert_eq!(source.read_frame().unwrap().data[0], 3);
        // Script dry, no fallback.
        assert!(source.read_frame().is_err());
    }

    #[test]
    fn test_sequence_numbers_span_reopens() {
        let backend = ScriptedBackend::endless("cam", ScriptedRead::Solid(0));
        let mut a = backend.open(0, small_hints()).unwrap();
        assert_eq!(a.read_frame().unwrap().sequence, 0);
        drop(a);
        let mut b = backend.open(0, small_hints()).unwrap();
        assert_eq!(b.read_frame().unwrap().sequence, 1);
    }

    #[test]
    fn test_textured_frames_have_variance() {
        let backend = ScriptedBackend::endless("cam", ScriptedRead::Textured);
        let mut source = backend.open(0, small_hints()).unwrap();
        let frame = source.read_frame().unwrap();
        let first = frame.data[0];
        assert!(frame.data.iter().any(|&v| v != first));
    }
}
