//! Capture sessions, sequences and frames.
//!
//! A [`CaptureSession`] is created on a logical camera and survives the
//! physical camera underneath being swapped or reconnected. Each
//! `start_capture` opens a new sequence with its own frame counter.

mod sequence;
mod session;
mod types;

pub use sequence::CaptureSequence;
pub use session::CaptureSession;
pub use types::{
    CameraFrame, CaptureCallback, CaptureRequest, CaptureSequenceId, CaptureSessionCallback,
    CaptureSessionId, CaptureStatusCallback, ImageFormat, Size, StreamingState,
};

pub(crate) use session::{DelegatingCaptureSession, SessionParams};

use std::sync::Arc;

use crate::backend::PhysicalCamera;
use crate::error::CameraErrorKind;

/// The logical camera a session reports back to.
pub(crate) trait SessionOwner: Send + Sync {
    /// Streaming from `camera` failed. Dropped unless `camera` is still bound.
    fn report_stream_error(&self, camera: &Arc<dyn PhysicalCamera>, error: CameraErrorKind);

    fn on_session_closed(&self, session: CaptureSessionId);
}
