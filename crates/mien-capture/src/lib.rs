//! Camera capture for the mien pipeline.
//!
//! [`session::CaptureSession`] wraps an ordered list of capture backends
//! behind one probe routine and a small `Closed → Opening → Streaming →
//! Recovering` state machine, so the rest of the system never deals with
//! driver-specific failure modes. Frames come out as RGB24 buffers.

pub mod frame;
pub mod scripted;
pub mod session;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use frame::{Frame, FrameError};
pub use session::{
    CaptureBackend, CaptureError, CaptureHints, CaptureSession, SessionState, VideoSource,
};
