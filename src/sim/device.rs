//! Simulated device descriptions.

use std::time::Duration;

use super::controls::{ExposureCaps, FocusCaps};
use crate::backend::StreamMode;
use crate::capture::{ImageFormat, Size};
use crate::error::OpenFailure;
use crate::identity::CameraName;

/// A simulated camera device.
///
/// ```
/// use std::time::Duration;
/// use resilient_cam::sim::SimDeviceSpec;
///
/// let spec = SimDeviceSpec::webcam("C920-1")
///     .open_delay(Duration::from_millis(20))
///     .frame_interval(Duration::from_millis(5));
/// assert_eq!(spec.name.serial_number(), Some("C920-1"));
/// ```
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    pub name: CameraName,
    pub open_delay: Duration,
    pub fail_open: Option<OpenFailure>,
    pub deny_permission: bool,
    pub exposure: Option<ExposureCaps>,
    pub focus: Option<FocusCaps>,
    pub frame_interval: Duration,
    pub modes: Vec<StreamMode>,
}

impl SimDeviceSpec {
    fn new(name: CameraName) -> Self {
        Self {
            name,
            open_delay: Duration::from_millis(5),
            fail_open: None,
            deny_permission: false,
            exposure: Some(ExposureCaps::default()),
            focus: Some(FocusCaps::default()),
            frame_interval: Duration::from_millis(10),
            modes: default_modes(),
        }
    }

    /// A USB webcam identified by serial number.
    pub fn webcam(serial_number: impl Into<String>) -> Self {
        Self::new(CameraName::webcam(serial_number))
    }

    /// A built-in camera; always present, never hot-plugged.
    pub fn builtin(id: impl Into<String>) -> Self {
        Self::new(CameraName::builtin(id))
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn fail_open(mut self, reason: OpenFailure) -> Self {
        self.fail_open = Some(reason);
        self
    }

    pub fn deny_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    pub fn exposure(mut self, caps: ExposureCaps) -> Self {
        self.exposure = Some(caps);
        self
    }

    pub fn without_exposure(mut self) -> Self {
        self.exposure = None;
        self
    }

    pub fn focus(mut self, caps: FocusCaps) -> Self {
        self.focus = Some(caps);
        self
    }

    pub fn without_focus(mut self) -> Self {
        self.focus = None;
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn modes(mut self, modes: Vec<StreamMode>) -> Self {
        self.modes = modes;
        self
    }
}

/// 640x480 and 320x240 in YUY2 and MJPEG, up to 30 fps.
pub fn default_modes() -> Vec<StreamMode> {
    let mut modes = Vec::new();
    for format in [ImageFormat::Yuy2, ImageFormat::Mjpeg] {
        for size in [Size::new(640, 480), Size::new(320, 240)] {
            modes.push(StreamMode {
                format,
                size,
                fps: 30,
            });
        }
    }
    modes
}
