//! In-process simulation of the platform camera stack.
//!
//! Used by the integration tests and the demo binary. Devices are scripted
//! with [`SimDeviceSpec`] and hot-plugged with [`SimCameraManager::plug`] /
//! [`SimCameraManager::unplug`].

mod camera;
mod controls;
mod device;
mod manager;

pub use camera::{SimCamera, SimCaptureSession};
pub use controls::{ExposureCaps, FocusCaps, SimExposureControl, SimFocusControl};
pub use device::{default_modes, SimDeviceSpec};
pub use manager::SimCameraManager;
