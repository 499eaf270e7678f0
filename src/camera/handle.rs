//! Client handles to logical cameras.

use std::sync::Arc;

use super::state::LogicalCameraState;
use crate::backend::CameraCharacteristics;
use crate::capture::{CaptureSession, CaptureSessionCallback};
use crate::continuation::Continuation;
use crate::controls::{CachingExposureControl, CachingFocusControl, CameraControl, ControlType};
use crate::error::{CameraException, OpenFailure};
use crate::identity::CameraName;

/// A logical camera as seen through a [`CameraHandle`].
pub trait LogicalCamera: Send + Sync {
    fn name(&self) -> &CameraName;

    fn state(&self) -> LogicalCameraState;

    /// Name of the physical camera currently bound, if any.
    fn active_physical(&self) -> Option<CameraName>;

    /// Stream modes usable whichever physical camera is bound.
    fn characteristics(&self) -> Option<CameraCharacteristics>;

    fn create_capture_session(
        &self,
        callback: Continuation<dyn CaptureSessionCallback>,
    ) -> Result<CaptureSession, CameraException>;

    fn control(&self, control_type: ControlType) -> Option<CameraControl>;

    fn switchable(&self) -> Option<&dyn Switchable>;

    fn add_external_ref(&self) -> usize;

    fn release_external_ref(&self);
}

/// Open state of one member of a switchable camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Opening,
    Opened,
    OpenFailed(OpenFailure),
    Closed,
}

/// Member selection on a switchable camera.
pub trait Switchable: Send + Sync {
    /// Members in the order the camera was created with.
    fn members(&self) -> &[CameraName];

    fn member_states(&self) -> Vec<(CameraName, MemberState)>;

    fn active_camera(&self) -> Option<CameraName>;

    /// Rebind the camera to `member`. Sessions and controls follow
    /// before this returns.
    fn set_active_camera(&self, member: &CameraName) -> Result<(), CameraException>;
}

/// Counted client reference to a logical camera.
///
/// Every clone holds one external reference. Dropping the last one closes
/// the camera asynchronously; `on_closed` follows on the state callback.
pub struct CameraHandle {
    camera: Arc<dyn LogicalCamera>,
}

impl CameraHandle {
    pub(crate) fn new(camera: Arc<dyn LogicalCamera>) -> Self {
        camera.add_external_ref();
        Self { camera }
    }

    pub fn name(&self) -> &CameraName {
        self.camera.name()
    }

    pub fn state(&self) -> LogicalCameraState {
        self.camera.state()
    }

    pub fn active_physical(&self) -> Option<CameraName> {
        self.camera.active_physical()
    }

    pub fn characteristics(&self) -> Option<CameraCharacteristics> {
        self.camera.characteristics()
    }

    /// Create a capture session, closing any previous one on this camera.
    pub fn create_capture_session(
        &self,
        callback: Continuation<dyn CaptureSessionCallback>,
    ) -> Result<CaptureSession, CameraException> {
        self.camera.create_capture_session(callback)
    }

    pub fn control(&self, control_type: ControlType) -> Option<CameraControl> {
        self.camera.control(control_type)
    }

    pub fn exposure_control(&self) -> Option<Arc<CachingExposureControl>> {
        self.control(ControlType::Exposure)?.as_exposure().cloned()
    }

    pub fn focus_control(&self) -> Option<Arc<CachingFocusControl>> {
        self.control(ControlType::Focus)?.as_focus().cloned()
    }

    /// Member selection, for switchable cameras.
    pub fn switchable(&self) -> Option<&dyn Switchable> {
        self.camera.switchable()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Clone for CameraHandle {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.camera))
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.camera.release_external_ref();
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("name", self.camera.name())
            .field("state", &self.camera.state())
            .finish()
    }
}
