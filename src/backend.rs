//! Contracts for the platform camera stack.
//!
//! The logical cameras in this crate sit on top of a host-provided camera
//! manager that does USB enumeration, permission prompts and the physical
//! open/close. These traits describe what the logical layer needs from it.
//! [`crate::sim`] provides an in-process implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{CameraFrame, CaptureRequest, ImageFormat, Size};
use crate::controls::{ExposureControl, FocusControl};
use crate::error::{CameraErrorKind, CameraException, OpenFailure};
use crate::identity::CameraName;

/// Frame delivery from a physical capture session.
pub type FrameCallback = Arc<dyn Fn(CameraFrame) + Send + Sync>;

/// Point in time an asynchronous operation must finish by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn has_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// A USB device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    /// OS-level device node; changes on every re-attach.
    pub device_name: String,
    pub serial_number: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Attach/detach notifications.
pub trait UsbAttachListener: Send + Sync {
    fn on_attached(&self, device: &UsbDevice);
    fn on_detached(&self, device: &UsbDevice);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbListenerId(pub u64);

/// One supported stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamMode {
    pub format: ImageFormat,
    pub size: Size,
    pub fps: u32,
}

/// What a camera can stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraCharacteristics {
    pub modes: Vec<StreamMode>,
}

impl CameraCharacteristics {
    /// Modes supported by both, in `self`'s order.
    pub fn intersect(&self, other: &CameraCharacteristics) -> CameraCharacteristics {
        CameraCharacteristics {
            modes: self
                .modes
                .iter()
                .filter(|mode| other.modes.contains(mode))
                .copied()
                .collect(),
        }
    }

    pub fn supports(&self, request: &CaptureRequest) -> bool {
        self.modes.iter().any(|mode| {
            mode.format == request.format && mode.size == request.size && mode.fps >= request.fps
        })
    }
}

/// Lifecycle notifications for one physical open attempt.
pub trait PhysicalStateCallback: Send + Sync {
    fn on_opened(&self, camera: Arc<dyn PhysicalCamera>);
    fn on_open_failed(&self, name: &CameraName, reason: OpenFailure);
    /// The camera closed, either on request or because the device vanished.
    fn on_closed(&self, camera: &Arc<dyn PhysicalCamera>);
    fn on_error(&self, camera: &Arc<dyn PhysicalCamera>, error: CameraErrorKind);
}

/// An open physical camera.
pub trait PhysicalCamera: Send + Sync {
    fn name(&self) -> CameraName;

    /// Current OS device node, for USB cameras.
    fn usb_device_name(&self) -> Option<String>;

    /// Configure a capture session. The outcome arrives on `callback`.
    fn create_capture_session(
        &self,
        callback: Arc<dyn PhysicalSessionCallback>,
    ) -> Result<(), CameraException>;

    fn exposure_control(&self) -> Option<Arc<dyn ExposureControl>>;

    fn focus_control(&self) -> Option<Arc<dyn FocusControl>>;

    /// Close the device. `on_closed` follows on the state callback.
    fn close(&self);
}

/// Outcome of `PhysicalCamera::create_capture_session`.
pub trait PhysicalSessionCallback: Send + Sync {
    fn on_configured(&self, session: Arc<dyn PhysicalCaptureSession>);
    fn on_configure_failed(&self);
    fn on_closed(&self);
}

/// A configured physical capture session.
pub trait PhysicalCaptureSession: Send + Sync {
    fn start_capture(
        &self,
        request: &CaptureRequest,
        on_frame: FrameCallback,
    ) -> Result<(), CameraException>;

    fn stop_capture(&self);

    fn close(&self);
}

/// The platform camera manager.
pub trait CameraManager: Send + Sync {
    /// Open a concrete camera, reporting on `callback` before `deadline`.
    fn open_camera_assuming_permission(
        &self,
        name: &CameraName,
        deadline: Deadline,
        callback: Arc<dyn PhysicalStateCallback>,
    );

    /// Ask the user for access to a concrete camera.
    fn request_permission(
        &self,
        name: &CameraName,
        deadline: Deadline,
        on_result: Box<dyn FnOnce(bool) + Send>,
    );

    fn usb_devices(&self) -> Vec<UsbDevice>;

    fn register_usb_listener(&self, listener: Arc<dyn UsbAttachListener>) -> UsbListenerId;

    fn unregister_usb_listener(&self, id: UsbListenerId);

    fn characteristics(&self, name: &CameraName) -> Option<CameraCharacteristics>;
}

/// Identity comparison for physical camera handles.
pub fn same_camera(a: &Arc<dyn PhysicalCamera>, b: &Arc<dyn PhysicalCamera>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// `same_camera` over optional bindings.
pub fn same_binding(a: Option<&Arc<dyn PhysicalCamera>>, b: Option<&Arc<dyn PhysicalCamera>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_camera(a, b),
        (None, None) => true,
        _ => false,
    }
}
