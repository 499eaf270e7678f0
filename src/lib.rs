//! resilient-cam library crate.
//!
//! Logical cameras that stay usable while the physical device behind them
//! comes and goes: a USB webcam that survives hot-plug, and a switchable
//! camera that moves one capture session between several devices.
//!
//! The platform is reached through the traits in [`backend`]; [`sim`]
//! provides an in-process implementation used by the tests and the demo
//! binary.

pub mod backend;
pub mod camera;
pub mod capture;
pub mod config;
pub mod continuation;
pub mod controls;
pub mod error;
pub mod executor;
pub mod identity;
pub mod refcount;
pub mod sim;

pub use camera::{
    CameraHandle, CameraStateCallback, LogicalCameraState, MemberState, Switchable,
    SwitchableCamera, UsbResilientWebcam,
};
pub use capture::{
    CameraFrame, CaptureCallback, CaptureRequest, CaptureSequence, CaptureSession,
    CaptureSessionCallback, CaptureStatusCallback, ImageFormat, Size,
};
pub use config::CameraConfig;
pub use continuation::Continuation;
pub use error::{CameraErrorKind, CameraException, CameraExceptionKind, OpenFailure};
pub use identity::CameraName;
