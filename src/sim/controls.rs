//! Device-side exposure and focus controls.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::controls::{ExposureControl, ExposureMode, FocusControl, FocusMode};

/// What a simulated device's exposure control can do.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureCaps {
    pub modes: Vec<ExposureMode>,
    pub min: Duration,
    pub max: Duration,
    pub initial_mode: ExposureMode,
    pub initial: Duration,
}

impl Default for ExposureCaps {
    fn default() -> Self {
        Self {
            modes: vec![
                ExposureMode::Auto,
                ExposureMode::ContinuousAuto,
                ExposureMode::Manual,
            ],
            min: Duration::from_micros(100),
            max: Duration::from_millis(100),
            initial_mode: ExposureMode::ContinuousAuto,
            initial: Duration::from_millis(10),
        }
    }
}

/// What a simulated device's focus control can do.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusCaps {
    pub modes: Vec<FocusMode>,
    pub min: f64,
    pub max: f64,
    pub initial_mode: FocusMode,
    pub initial: f64,
}

impl Default for FocusCaps {
    fn default() -> Self {
        Self {
            modes: vec![FocusMode::ContinuousAuto, FocusMode::Fixed],
            min: 0.0,
            max: 250.0,
            initial_mode: FocusMode::ContinuousAuto,
            initial: 0.0,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exposure control of a simulated device. Every open starts from the
/// initial values in its caps, like hardware after a power cycle.
#[derive(Debug)]
pub struct SimExposureControl {
    caps: ExposureCaps,
    state: Mutex<(ExposureMode, Duration)>,
}

impl SimExposureControl {
    pub fn new(caps: ExposureCaps) -> Self {
        let state = Mutex::new((caps.initial_mode, caps.initial));
        Self { caps, state }
    }
}

impl ExposureControl for SimExposureControl {
    fn mode(&self) -> ExposureMode {
        lock(&self.state).0
    }

    fn set_mode(&self, mode: ExposureMode) -> bool {
        if !self.caps.modes.contains(&mode) {
            return false;
        }
        lock(&self.state).0 = mode;
        true
    }

    fn is_mode_supported(&self, mode: ExposureMode) -> bool {
        self.caps.modes.contains(&mode)
    }

    fn min_exposure(&self) -> Option<Duration> {
        Some(self.caps.min)
    }

    fn max_exposure(&self) -> Option<Duration> {
        Some(self.caps.max)
    }

    fn exposure(&self) -> Option<Duration> {
        Some(lock(&self.state).1)
    }

    fn set_exposure(&self, exposure: Duration) -> bool {
        let mut state = lock(&self.state);
        if !state.0.allows_manual_exposure() || exposure < self.caps.min || exposure > self.caps.max
        {
            return false;
        }
        state.1 = exposure;
        true
    }

    fn is_exposure_supported(&self) -> bool {
        self.caps.modes.iter().any(|m| m.allows_manual_exposure())
    }
}

/// Focus control of a simulated device.
#[derive(Debug)]
pub struct SimFocusControl {
    caps: FocusCaps,
    state: Mutex<(FocusMode, f64)>,
}

impl SimFocusControl {
    pub fn new(caps: FocusCaps) -> Self {
        let state = Mutex::new((caps.initial_mode, caps.initial));
        Self { caps, state }
    }
}

impl FocusControl for SimFocusControl {
    fn mode(&self) -> FocusMode {
        lock(&self.state).0
    }

    fn set_mode(&self, mode: FocusMode) -> bool {
        if !self.caps.modes.contains(&mode) {
            return false;
        }
        lock(&self.state).0 = mode;
        true
    }

    fn is_mode_supported(&self, mode: FocusMode) -> bool {
        self.caps.modes.contains(&mode)
    }

    fn min_focus_length(&self) -> Option<f64> {
        Some(self.caps.min)
    }

    fn max_focus_length(&self) -> Option<f64> {
        Some(self.caps.max)
    }

    fn focus_length(&self) -> Option<f64> {
        Some(lock(&self.state).1)
    }

    fn set_focus_length(&self, length: f64) -> bool {
        let mut state = lock(&self.state);
        if !state.0.allows_manual_focus() || length < self.caps.min || length > self.caps.max {
            return false;
        }
        state.1 = length;
        true
    }

    fn is_focus_length_supported(&self) -> bool {
        self.caps.modes.contains(&FocusMode::Fixed)
    }
}
