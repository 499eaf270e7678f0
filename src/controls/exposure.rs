//! Caching exposure proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{tightest_lower, tightest_upper, ExposureControl, ExposureMode, UnsupportedExposureControl};
use crate::backend::PhysicalCamera;

/// Exposure control that outlives the physical camera behind it.
///
/// Remembers the last mode and exposure that were set and pushes them onto
/// each newly bound camera. Limits are captured once, on first contact with
/// real hardware, and never recomputed; for a switchable group they are the
/// intersection over all members.
pub struct CachingExposureControl {
    state: Mutex<ExposureCache>,
}

struct ExposureCache {
    delegate: Arc<dyn ExposureControl>,
    bound: bool,
    limits: Option<ExposureLimits>,
    mode: ExposureMode,
    exposure: Option<Duration>,
}

#[derive(Debug, Clone)]
struct ExposureLimits {
    supported_modes: HashMap<ExposureMode, bool>,
    exposure_supported: bool,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl ExposureLimits {
    fn aggregate(controls: &[Arc<dyn ExposureControl>]) -> Self {
        let supported_modes = ExposureMode::ALL
            .iter()
            .map(|mode| (*mode, controls.iter().all(|c| c.is_mode_supported(*mode))))
            .collect();
        let min = tightest_lower(controls.iter().map(|c| c.min_exposure()));
        let max = tightest_upper(controls.iter().map(|c| c.max_exposure()));
        let overlapping = matches!((min, max), (Some(lo), Some(hi)) if lo <= hi);
        let exposure_supported =
            overlapping && controls.iter().all(|c| c.is_exposure_supported());
        Self {
            supported_modes,
            exposure_supported,
            min,
            max,
        }
    }

    fn unsupported() -> Self {
        Self {
            supported_modes: HashMap::new(),
            exposure_supported: false,
            min: None,
            max: None,
        }
    }

    fn in_range(&self, exposure: Duration) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= exposure && exposure <= max,
            _ => false,
        }
    }
}

impl Default for CachingExposureControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CachingExposureControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.lock();
        f.debug_struct("CachingExposureControl")
            .field("bound", &cache.bound)
            .field("mode", &cache.mode)
            .field("exposure", &cache.exposure)
            .field("limits", &cache.limits)
            .finish()
    }
}

impl CachingExposureControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExposureCache {
                delegate: Arc::new(UnsupportedExposureControl),
                bound: false,
                limits: None,
                mode: ExposureMode::Unknown,
                exposure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExposureCache> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether a physical control is currently behind this proxy.
    pub fn is_bound(&self) -> bool {
        self.lock().bound
    }

    pub(crate) fn on_camera_changed(
        &self,
        active: Option<&Arc<dyn PhysicalCamera>>,
        members: &[Arc<dyn PhysicalCamera>],
    ) {
        let mut cache = self.lock();
        let real = active.and_then(|camera| camera.exposure_control());
        cache.bound = real.is_some();
        cache.delegate = real.unwrap_or_else(|| Arc::new(UnsupportedExposureControl));

        if cache.limits.is_none() && !members.is_empty() {
            let controls: Vec<_> = members.iter().filter_map(|m| m.exposure_control()).collect();
            cache.limits = Some(if controls.len() == members.len() {
                ExposureLimits::aggregate(&controls)
            } else {
                ExposureLimits::unsupported()
            });
            log::debug!("Exposure limits initialized: {:?}", cache.limits);
        }

        if !cache.bound {
            return;
        }

        // Write the cached state, then read back what the device settled on
        let delegate = Arc::clone(&cache.delegate);
        if cache.mode != ExposureMode::Unknown
            && delegate.is_mode_supported(cache.mode)
            && delegate.mode() != cache.mode
            && !delegate.set_mode(cache.mode)
        {
            log::warn!("Rebound camera refused exposure mode {:?}", cache.mode);
        }
        if let Some(exposure) = cache.exposure {
            if delegate.mode().allows_manual_exposure() {
                if !delegate.set_exposure(exposure) {
                    log::warn!("Rebound camera refused exposure {:?}", exposure);
                }
            } else {
                log::debug!("Not restoring exposure while in {:?}", delegate.mode());
            }
        }

        cache.mode = delegate.mode();
        if let Some(exposure) = delegate.exposure() {
            cache.exposure = Some(exposure);
        }
    }
}

impl ExposureControl for CachingExposureControl {
    fn mode(&self) -> ExposureMode {
        let mut cache = self.lock();
        if cache.bound {
            cache.mode = cache.delegate.mode();
        }
        cache.mode
    }

    fn set_mode(&self, mode: ExposureMode) -> bool {
        let mut cache = self.lock();
        let supported = cache
            .limits
            .as_ref()
            .and_then(|l| l.supported_modes.get(&mode).copied())
            .unwrap_or(false);
        if !supported || !cache.bound {
            return false;
        }
        if cache.delegate.set_mode(mode) {
            cache.mode = mode;
            true
        } else {
            false
        }
    }

    fn is_mode_supported(&self, mode: ExposureMode) -> bool {
        self.lock()
            .limits
            .as_ref()
            .and_then(|l| l.supported_modes.get(&mode).copied())
            .unwrap_or(false)
    }

    fn min_exposure(&self) -> Option<Duration> {
        self.lock().limits.as_ref().and_then(|l| l.min)
    }

    fn max_exposure(&self) -> Option<Duration> {
        self.lock().limits.as_ref().and_then(|l| l.max)
    }

    fn exposure(&self) -> Option<Duration> {
        let mut cache = self.lock();
        if cache.bound {
            if let Some(exposure) = cache.delegate.exposure() {
                cache.exposure = Some(exposure);
            }
        }
        cache.exposure
    }

    fn set_exposure(&self, exposure: Duration) -> bool {
        let mut cache = self.lock();
        let allowed = cache
            .limits
            .as_ref()
            .map(|l| l.exposure_supported && l.in_range(exposure))
            .unwrap_or(false);
        if !allowed || !cache.bound {
            return false;
        }
        if !cache.delegate.mode().allows_manual_exposure() {
            log::debug!("Refusing exposure {:?} while in {:?}", exposure, cache.delegate.mode());
            return false;
        }
        if cache.delegate.set_exposure(exposure) {
            cache.exposure = Some(exposure);
            true
        } else {
            false
        }
    }

    fn is_exposure_supported(&self) -> bool {
        self.lock()
            .limits
            .as_ref()
            .map(|l| l.exposure_supported)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::testing::ControlCamera;
    use crate::sim::ExposureCaps;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn caps(min: u64, max: u64) -> ExposureCaps {
        ExposureCaps {
            modes: vec![ExposureMode::Auto, ExposureMode::Manual],
            min: ms(min),
            max: ms(max),
            initial_mode: ExposureMode::Auto,
            initial: ms(min),
        }
    }

    #[test]
    fn test_unbound_proxy_is_unsupported() {
        let control = CachingExposureControl::new();
        assert!(!control.is_bound());
        assert_eq!(control.mode(), ExposureMode::Unknown);
        assert!(!control.is_exposure_supported());
        assert!(!control.set_exposure(ms(5)));
        assert_eq!(control.min_exposure(), None);
    }

    #[test]
    fn test_first_bind_reads_device_state() {
        let cam = ControlCamera::with_exposure("A", caps(1, 100));
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&cam), &[cam.clone()]);

        assert!(control.is_bound());
        assert_eq!(control.mode(), ExposureMode::Auto);
        assert_eq!(control.min_exposure(), Some(ms(1)));
        assert_eq!(control.max_exposure(), Some(ms(100)));
        assert!(control.is_mode_supported(ExposureMode::Manual));
        assert!(!control.is_mode_supported(ExposureMode::ShutterPriority));
    }

    #[test]
    fn test_exposure_refused_in_auto_mode() {
        let cam = ControlCamera::with_exposure("A", caps(1, 100));
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&cam), &[cam.clone()]);

        assert!(!control.set_exposure(ms(10)));
        assert!(control.set_mode(ExposureMode::Manual));
        assert!(control.set_exposure(ms(10)));
        assert_eq!(control.exposure(), Some(ms(10)));
        assert!(!control.set_exposure(ms(500)), "out of range");
    }

    #[test]
    fn test_value_survives_rebind() {
        let first = ControlCamera::with_exposure("A", caps(1, 100));
        let second = ControlCamera::with_exposure("A", caps(1, 100));
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&first), &[first.clone()]);
        assert!(control.set_mode(ExposureMode::Manual));
        assert!(control.set_exposure(ms(42)));

        control.on_camera_changed(None, &[]);
        assert!(!control.is_bound());
        assert_eq!(control.exposure(), Some(ms(42)));
        assert!(!control.set_exposure(ms(43)), "no device to accept the write");

        control.on_camera_changed(Some(&second), &[second.clone()]);
        let device = second.exposure_control().unwrap();
        assert_eq!(device.mode(), ExposureMode::Manual);
        assert_eq!(device.exposure(), Some(ms(42)));
        assert_eq!(control.exposure(), Some(ms(42)));
    }

    #[test]
    fn test_limits_aggregate_across_members() {
        let a = ControlCamera::with_exposure("A", caps(2, 100));
        let b = ControlCamera::with_exposure(
            "B",
            ExposureCaps {
                modes: vec![ExposureMode::Auto, ExposureMode::Manual, ExposureMode::ShutterPriority],
                ..caps(5, 60)
            },
        );
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&a), &[a.clone(), b.clone()]);

        assert_eq!(control.min_exposure(), Some(ms(5)));
        assert_eq!(control.max_exposure(), Some(ms(60)));
        assert!(control.is_mode_supported(ExposureMode::Manual));
        assert!(!control.is_mode_supported(ExposureMode::ShutterPriority));
    }

    #[test]
    fn test_disjoint_ranges_disable_exposure() {
        let a = ControlCamera::with_exposure("A", caps(1, 10));
        let b = ControlCamera::with_exposure("B", caps(20, 30));
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&a), &[a.clone(), b.clone()]);
        assert!(!control.is_exposure_supported());
    }

    #[test]
    fn test_member_without_control_makes_everything_unsupported() {
        let a = ControlCamera::with_exposure("A", caps(1, 10));
        let bare = ControlCamera::bare("B");
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&a), &[a.clone(), bare]);
        assert!(!control.is_mode_supported(ExposureMode::Auto));
        assert!(!control.is_exposure_supported());
    }

    #[test]
    fn test_limits_captured_only_once() {
        let narrow = ControlCamera::with_exposure("A", caps(10, 20));
        let wide = ControlCamera::with_exposure("B", caps(1, 100));
        let control = CachingExposureControl::new();
        control.on_camera_changed(Some(&narrow), &[narrow.clone()]);
        control.on_camera_changed(Some(&wide), &[wide.clone()]);
        assert_eq!(control.min_exposure(), Some(ms(10)));
        assert_eq!(control.max_exposure(), Some(ms(20)));
    }
}
