//! Error types shared across the camera layer.
//!
//! Three kinds of failure are kept apart:
//! - [`OpenFailure`]: why an open attempt did not produce a camera.
//! - [`CameraErrorKind`]: a runtime error reported after a camera opened.
//! - [`CameraException`]: the error returned by operations that fail
//!   synchronously, such as starting a capture.

use std::fmt;

/// Reason an open attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum OpenFailure {
    /// No failure; used as the neutral value in reports.
    #[error("no failure")]
    None,
    /// The device went away before or during the open.
    #[error("camera disconnected")]
    Disconnected,
    /// Another client holds the device.
    #[error("camera is in use")]
    InUse,
    /// The user or platform refused access to the device.
    #[error("camera permission denied")]
    PermissionDenied,
    /// The open did not complete before its deadline.
    #[error("camera open timed out")]
    Timeout,
    /// The platform camera stack failed internally.
    #[error("internal camera error")]
    InternalError,
    /// The logical camera is already in a terminal state.
    #[error("camera already closed")]
    CameraClosed,
    /// Anything the platform could not classify.
    #[error("camera open failed")]
    OtherFailure,
}

/// Runtime error reported through `on_error` after a camera opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CameraErrorKind {
    #[error("camera disconnected")]
    Disconnected,
    #[error("camera operation timed out")]
    Timeout,
    #[error("capture session failed to configure")]
    ConfigureFailed,
    #[error("streaming failed")]
    StreamingFailed,
    #[error("internal camera error")]
    InternalError,
    #[error("camera service error")]
    CameraServiceError,
}

/// Category of a [`CameraException`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraExceptionKind {
    /// The logical camera is not open.
    CameraClosed,
    /// The capture session was already closed.
    SessionClosed,
    /// A capture request did not target this camera.
    InvalidRequest,
    /// The identity is not one of the members the camera was built from.
    UnknownMember,
    /// The member exists but has no open physical camera.
    MemberNotOpen,
    /// Streaming could not be established.
    Streaming(CameraErrorKind),
}

impl fmt::Display for CameraExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraExceptionKind::CameraClosed => write!(f, "camera closed"),
            CameraExceptionKind::SessionClosed => write!(f, "capture session closed"),
            CameraExceptionKind::InvalidRequest => write!(f, "invalid capture request"),
            CameraExceptionKind::UnknownMember => write!(f, "unknown member camera"),
            CameraExceptionKind::MemberNotOpen => write!(f, "member camera not open"),
            CameraExceptionKind::Streaming(kind) => write!(f, "streaming error ({})", kind),
        }
    }
}

/// Error from an operation that can fail synchronously.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CameraException {
    pub kind: CameraExceptionKind,
    pub message: String,
}

impl CameraException {
    pub fn new(kind: CameraExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn camera_closed(message: impl Into<String>) -> Self {
        Self::new(CameraExceptionKind::CameraClosed, message)
    }

    pub fn streaming(error: CameraErrorKind, message: impl Into<String>) -> Self {
        Self::new(CameraExceptionKind::Streaming(error), message)
    }

    /// The runtime error this exception corresponds to, if any.
    pub fn error_kind(&self) -> CameraErrorKind {
        match self.kind {
            CameraExceptionKind::Streaming(kind) => kind,
            CameraExceptionKind::CameraClosed => CameraErrorKind::Disconnected,
            _ => CameraErrorKind::InternalError,
        }
    }
}
