//! Camera controls (exposure, focus).
//!
//! Physical cameras expose [`ExposureControl`] and [`FocusControl`]
//! implementations. Logical cameras hand out caching proxies instead, which
//! survive the physical camera being swapped or reconnected:
//! - [`CachingExposureControl`]
//! - [`CachingFocusControl`]

mod exposure;
mod focus;

use std::sync::Arc;
use std::time::Duration;

use crate::backend::PhysicalCamera;

pub use exposure::CachingExposureControl;
pub use focus::CachingFocusControl;

/// Auto-exposure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExposureMode {
    Unknown,
    Auto,
    ContinuousAuto,
    Manual,
    ShutterPriority,
    AperturePriority,
}

impl ExposureMode {
    pub const ALL: [ExposureMode; 5] = [
        ExposureMode::Auto,
        ExposureMode::ContinuousAuto,
        ExposureMode::Manual,
        ExposureMode::ShutterPriority,
        ExposureMode::AperturePriority,
    ];

    /// Whether a device accepts an explicit exposure time in this mode.
    pub fn allows_manual_exposure(self) -> bool {
        matches!(self, ExposureMode::Manual | ExposureMode::ShutterPriority)
    }
}

/// Focus modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusMode {
    Unknown,
    Auto,
    ContinuousAuto,
    Macro,
    Infinity,
    Fixed,
}

impl FocusMode {
    pub const ALL: [FocusMode; 5] = [
        FocusMode::Auto,
        FocusMode::ContinuousAuto,
        FocusMode::Macro,
        FocusMode::Infinity,
        FocusMode::Fixed,
    ];

    /// Whether a device accepts an explicit focus length in this mode.
    pub fn allows_manual_focus(self) -> bool {
        self == FocusMode::Fixed
    }
}

/// Exposure control of a camera.
///
/// Getters return `None` when the value is not supported or not known.
/// Setters return whether the device accepted the value.
pub trait ExposureControl: Send + Sync {
    fn mode(&self) -> ExposureMode;
    fn set_mode(&self, mode: ExposureMode) -> bool;
    fn is_mode_supported(&self, mode: ExposureMode) -> bool;
    fn min_exposure(&self) -> Option<Duration>;
    fn max_exposure(&self) -> Option<Duration>;
    fn exposure(&self) -> Option<Duration>;
    fn set_exposure(&self, exposure: Duration) -> bool;
    fn is_exposure_supported(&self) -> bool;
}

/// Focus control of a camera. Focus lengths are in device units.
pub trait FocusControl: Send + Sync {
    fn mode(&self) -> FocusMode;
    fn set_mode(&self, mode: FocusMode) -> bool;
    fn is_mode_supported(&self, mode: FocusMode) -> bool;
    fn min_focus_length(&self) -> Option<f64>;
    fn max_focus_length(&self) -> Option<f64>;
    fn focus_length(&self) -> Option<f64>;
    fn set_focus_length(&self, length: f64) -> bool;
    fn is_focus_length_supported(&self) -> bool;
}

/// Stand-in used while no physical camera is bound.
#[derive(Debug, Default)]
pub struct UnsupportedExposureControl;

impl ExposureControl for UnsupportedExposureControl {
    fn mode(&self) -> ExposureMode {
        ExposureMode::Unknown
    }
    fn set_mode(&self, _mode: ExposureMode) -> bool {
        false
    }
    fn is_mode_supported(&self, _mode: ExposureMode) -> bool {
        false
    }
    fn min_exposure(&self) -> Option<Duration> {
        None
    }
    fn max_exposure(&self) -> Option<Duration> {
        None
    }
    fn exposure(&self) -> Option<Duration> {
        None
    }
    fn set_exposure(&self, _exposure: Duration) -> bool {
        false
    }
    fn is_exposure_supported(&self) -> bool {
        false
    }
}

/// Stand-in used while no physical camera is bound.
#[derive(Debug, Default)]
pub struct UnsupportedFocusControl;

impl FocusControl for UnsupportedFocusControl {
    fn mode(&self) -> FocusMode {
        FocusMode::Unknown
    }
    fn set_mode(&self, _mode: FocusMode) -> bool {
        false
    }
    fn is_mode_supported(&self, _mode: FocusMode) -> bool {
        false
    }
    fn min_focus_length(&self) -> Option<f64> {
        None
    }
    fn max_focus_length(&self) -> Option<f64> {
        None
    }
    fn focus_length(&self) -> Option<f64> {
        None
    }
    fn set_focus_length(&self, _length: f64) -> bool {
        false
    }
    fn is_focus_length_supported(&self) -> bool {
        false
    }
}

/// Kinds of control a logical camera can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Exposure,
    Focus,
}

/// A control proxy registered on a logical camera.
#[derive(Clone)]
pub enum CameraControl {
    Exposure(Arc<CachingExposureControl>),
    Focus(Arc<CachingFocusControl>),
}

impl std::fmt::Debug for CameraControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CameraControl::{:?}", self.control_type())
    }
}

impl CameraControl {
    pub fn control_type(&self) -> ControlType {
        match self {
            CameraControl::Exposure(_) => ControlType::Exposure,
            CameraControl::Focus(_) => ControlType::Focus,
        }
    }

    pub fn as_exposure(&self) -> Option<&Arc<CachingExposureControl>> {
        match self {
            CameraControl::Exposure(control) => Some(control),
            _ => None,
        }
    }

    pub fn as_focus(&self) -> Option<&Arc<CachingFocusControl>> {
        match self {
            CameraControl::Focus(control) => Some(control),
            _ => None,
        }
    }

    /// Rebind to a new physical camera. `members` are every physical camera
    /// whose capabilities bound this control.
    pub(crate) fn on_camera_changed(
        &self,
        active: Option<&Arc<dyn PhysicalCamera>>,
        members: &[Arc<dyn PhysicalCamera>],
    ) {
        match self {
            CameraControl::Exposure(control) => control.on_camera_changed(active, members),
            CameraControl::Focus(control) => control.on_camera_changed(active, members),
        }
    }
}

/// The standard control set: one exposure and one focus proxy.
pub fn standard_controls() -> Vec<CameraControl> {
    vec![
        CameraControl::Exposure(Arc::new(CachingExposureControl::new())),
        CameraControl::Focus(Arc::new(CachingFocusControl::new())),
    ]
}

/// Largest of the lower bounds; `None` if any member has none.
fn tightest_lower<T, I>(values: I) -> Option<T>
where
    T: PartialOrd,
    I: IntoIterator<Item = Option<T>>,
{
    tightest(values, |candidate, best| candidate > best)
}

/// Smallest of the upper bounds; `None` if any member has none.
fn tightest_upper<T, I>(values: I) -> Option<T>
where
    T: PartialOrd,
    I: IntoIterator<Item = Option<T>>,
{
    tightest(values, |candidate, best| candidate < best)
}

fn tightest<T, I>(values: I, better: impl Fn(&T, &T) -> bool) -> Option<T>
where
    I: IntoIterator<Item = Option<T>>,
{
    let mut best: Option<T> = None;
    for value in values {
        let value = value?;
        best = match best {
            Some(current) if !better(&value, &current) => Some(current),
            _ => Some(value),
        };
    }
    best
}
