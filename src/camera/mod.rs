//! Logical cameras.
//!
//! - [`UsbResilientWebcam`]: one USB webcam that survives hot-plug.
//! - [`SwitchableCamera`]: several physical cameras, one active at a time.
//!
//! Both are opened asynchronously and hand the client a [`CameraHandle`]
//! through [`CameraStateCallback::on_opened`].

mod delegating;
mod handle;
mod state;
mod switchable;
mod webcam;

pub use delegating::{CameraKind, DelegatingCamera};
pub use handle::{CameraHandle, LogicalCamera, MemberState, Switchable};
pub use state::{CameraStateCallback, LogicalCameraState};
pub use switchable::{SwitchableCamera, SwitchableKind, SwitchableMemberInfo};
pub use webcam::{UsbResilientWebcam, WebcamKind};
