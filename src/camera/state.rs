//! Logical camera states and client notifications.

use std::fmt;

use super::handle::CameraHandle;
use crate::error::{CameraErrorKind, OpenFailure};
use crate::identity::CameraName;

/// Lifecycle of a logical camera.
///
/// `Nascent` leaves exactly once, to `OpenNotStarted`/`OpenAndStarted` or
/// to `FailedOpen`. `FailedOpen` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalCameraState {
    Nascent,
    /// Reported open; no physical camera bound.
    OpenNotStarted,
    /// Reported open with a physical camera bound.
    OpenAndStarted,
    /// Open from the client's point of view, device currently gone.
    Disconnected,
    FailedOpen,
    Closed,
}

impl LogicalCameraState {
    /// Open from the client's point of view.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            LogicalCameraState::OpenNotStarted
                | LogicalCameraState::OpenAndStarted
                | LogicalCameraState::Disconnected
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LogicalCameraState::FailedOpen | LogicalCameraState::Closed)
    }

    /// States from which the physical camera may be (re)opened.
    pub fn can_open_physical(self) -> bool {
        self == LogicalCameraState::Nascent || self.is_open()
    }
}

impl fmt::Display for LogicalCameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalCameraState::Nascent => "nascent",
            LogicalCameraState::OpenNotStarted => "open",
            LogicalCameraState::OpenAndStarted => "streaming-ready",
            LogicalCameraState::Disconnected => "disconnected",
            LogicalCameraState::FailedOpen => "failed",
            LogicalCameraState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications for a logical camera.
///
/// Delivered in transition order, each at most once. A client sees exactly
/// one of `on_opened` / `on_open_failed`, and nothing but `on_closed` after
/// that is terminal.
pub trait CameraStateCallback: Send + Sync {
    fn on_opened(&self, camera: CameraHandle);

    fn on_open_failed(&self, name: &CameraName, reason: OpenFailure);

    fn on_closed(&self, name: &CameraName);

    fn on_error(&self, name: &CameraName, error: CameraErrorKind) {
        log::warn!("{}: unhandled camera error: {}", name, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classes() {
        use LogicalCameraState::*;
        assert!(Disconnected.is_open());
        assert!(!Nascent.is_open());
        assert!(Nascent.can_open_physical());
        assert!(!FailedOpen.can_open_physical());
        assert!(!Closed.can_open_physical());
        assert!(Closed.is_terminal());
        assert!(!OpenAndStarted.is_terminal());
    }
}
