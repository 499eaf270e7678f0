//! Capture request, frame and callback types.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::identity::CameraName;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageFormat {
    Yuy2,
    Mjpeg,
    Rgb,
}

/// What to stream and from which logical camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub camera: CameraName,
    pub format: ImageFormat,
    pub size: Size,
    pub fps: u32,
}

impl CaptureRequest {
    pub fn new(camera: CameraName, format: ImageFormat, size: Size, fps: u32) -> Self {
        Self {
            camera,
            format,
            size,
            fps,
        }
    }

    /// The same request aimed at another camera.
    pub fn retarget(&self, camera: CameraName) -> Self {
        Self {
            camera,
            ..self.clone()
        }
    }
}

/// Identifies a capture session within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureSessionId(pub u32);

/// Identifies a capture sequence within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureSequenceId(pub u32);

impl fmt::Display for CaptureSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl fmt::Display for CaptureSequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

/// A captured frame.
///
/// Physical cameras fill in their own numbering; frames handed to clients
/// carry the sequence id and the sequence-wide frame number instead.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub sequence_id: CaptureSequenceId,
    pub frame_number: u64,
    pub size: Size,
    pub format: ImageFormat,
    pub capture_time: Instant,
    /// Shared so that renumbering never copies pixels
    pub data: Arc<[u8]>,
}

impl CameraFrame {
    /// Copy of this frame relabelled for a client-visible sequence.
    pub fn renumbered(&self, sequence_id: CaptureSequenceId, frame_number: u64) -> Self {
        Self {
            sequence_id,
            frame_number,
            ..self.clone()
        }
    }
}

/// Receives frames of a capture sequence.
pub trait CaptureCallback: Send + Sync {
    fn on_new_frame(&self, session: CaptureSessionId, frame: CameraFrame);
}

/// Receives terminal status of a capture sequence.
pub trait CaptureStatusCallback: Send + Sync {
    /// Called once when a sequence that streamed at least once ends.
    fn on_sequence_completed(
        &self,
        session: CaptureSessionId,
        sequence: CaptureSequenceId,
        last_frame_number: Option<u64>,
    );
}

/// Receives session lifecycle events.
pub trait CaptureSessionCallback: Send + Sync {
    fn on_closed(&self, session: CaptureSessionId);
}

/// Streaming state of a capture sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Stopped,
    Started,
    /// Started, but no physical camera is currently delivering.
    Paused,
}
