//! Caching focus proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{tightest_lower, tightest_upper, FocusControl, FocusMode, UnsupportedFocusControl};
use crate::backend::PhysicalCamera;

/// Focus control that outlives the physical camera behind it.
///
/// Same contract as [`super::CachingExposureControl`]: cached state is
/// written to each new camera, then the device's values are read back.
pub struct CachingFocusControl {
    state: Mutex<FocusCache>,
}

struct FocusCache {
    delegate: Arc<dyn FocusControl>,
    bound: bool,
    limits: Option<FocusLimits>,
    mode: FocusMode,
    focus_length: Option<f64>,
}

#[derive(Debug, Clone)]
struct FocusLimits {
    supported_modes: HashMap<FocusMode, bool>,
    length_supported: bool,
    min: Option<f64>,
    max: Option<f64>,
}

impl FocusLimits {
    fn aggregate(controls: &[Arc<dyn FocusControl>]) -> Self {
        let supported_modes = FocusMode::ALL
            .iter()
            .map(|mode| (*mode, controls.iter().all(|c| c.is_mode_supported(*mode))))
            .collect();
        let min = tightest_lower(controls.iter().map(|c| c.min_focus_length()));
        let max = tightest_upper(controls.iter().map(|c| c.max_focus_length()));
        let overlapping = matches!((min, max), (Some(lo), Some(hi)) if lo <= hi);
        Self {
            supported_modes,
            length_supported: overlapping
                && controls.iter().all(|c| c.is_focus_length_supported()),
            min,
            max,
        }
    }

    fn unsupported() -> Self {
        Self {
            supported_modes: HashMap::new(),
            length_supported: false,
            min: None,
            max: None,
        }
    }

    fn mode_supported(&self, mode: FocusMode) -> bool {
        self.supported_modes.get(&mode).copied().unwrap_or(false)
    }
}

impl Default for CachingFocusControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CachingFocusControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.lock();
        f.debug_struct("CachingFocusControl")
            .field("bound", &cache.bound)
            .field("mode", &cache.mode)
            .field("focus_length", &cache.focus_length)
            .finish_non_exhaustive()
    }
}

impl CachingFocusControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FocusCache {
                delegate: Arc::new(UnsupportedFocusControl),
                bound: false,
                limits: None,
                mode: FocusMode::Unknown,
                focus_length: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FocusCache> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bound
    }

    pub(crate) fn on_camera_changed(
        &self,
        active: Option<&Arc<dyn PhysicalCamera>>,
        members: &[Arc<dyn PhysicalCamera>],
    ) {
        let mut cache = self.lock();
        let real = active.and_then(|camera| camera.focus_control());
        cache.bound = real.is_some();
        cache.delegate = real.unwrap_or_else(|| Arc::new(UnsupportedFocusControl));

        if cache.limits.is_none() && !members.is_empty() {
            let controls: Vec<_> = members.iter().filter_map(|m| m.focus_control()).collect();
            cache.limits = Some(if controls.len() == members.len() {
                FocusLimits::aggregate(&controls)
            } else {
                FocusLimits::unsupported()
            });
        }

        if !cache.bound {
            return;
        }

        let delegate = Arc::clone(&cache.delegate);
        if cache.mode != FocusMode::Unknown
            && delegate.is_mode_supported(cache.mode)
            && delegate.mode() != cache.mode
            && !delegate.set_mode(cache.mode)
        {
            log::warn!("Rebound camera refused focus mode {:?}", cache.mode);
        }
        // A device in autofocus rejects explicit lengths
        if let Some(length) = cache.focus_length {
            if delegate.mode().allows_manual_focus() && !delegate.set_focus_length(length) {
                log::warn!("Rebound camera refused focus length {}", length);
            }
        }

        cache.mode = delegate.mode();
        if let Some(length) = delegate.focus_length() {
            cache.focus_length = Some(length);
        }
    }
}

impl FocusControl for CachingFocusControl {
    fn mode(&self) -> FocusMode {
        let mut cache = self.lock();
        if cache.bound {
            cache.mode = cache.delegate.mode();
        }
        cache.mode
    }

    fn set_mode(&self, mode: FocusMode) -> bool {
        let mut cache = self.lock();
        let supported = cache
            .limits
            .as_ref()
            .map(|l| l.mode_supported(mode))
            .unwrap_or(false);
        if !supported || !cache.bound || !cache.delegate.set_mode(mode) {
            return false;
        }
        cache.mode = mode;
        true
    }

    fn is_mode_supported(&self, mode: FocusMode) -> bool {
        self.lock()
            .limits
            .as_ref()
            .map(|l| l.mode_supported(mode))
            .unwrap_or(false)
    }

    fn min_focus_length(&self) -> Option<f64> {
        self.lock().limits.as_ref().and_then(|l| l.min)
    }

    fn max_focus_length(&self) -> Option<f64> {
        self.lock().limits.as_ref().and_then(|l| l.max)
    }

    fn focus_length(&self) -> Option<f64> {
        let mut cache = self.lock();
        if cache.bound {
            if let Some(length) = cache.delegate.focus_length() {
                cache.focus_length = Some(length);
            }
        }
        cache.focus_length
    }

    fn set_focus_length(&self, length: f64) -> bool {
        let mut cache = self.lock();
        let allowed = match cache.limits.as_ref() {
            Some(FocusLimits {
                length_supported: true,
                min: Some(min),
                max: Some(max),
                ..
            }) => *min <= length && length <= *max,
            _ => false,
        };
        if !allowed || !cache.bound || !cache.delegate.mode().allows_manual_focus() {
            return false;
        }
        if cache.delegate.set_focus_length(length) {
            cache.focus_length = Some(length);
            true
        } else {
            false
        }
    }

    fn is_focus_length_supported(&self) -> bool {
        self.lock()
            .limits
            .as_ref()
            .map(|l| l.length_supported)
            .unwrap_or(false)
    }
}
