//! Simulated camera manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::camera::{SimCamera, SimCameraParts};
use super::controls::{SimExposureControl, SimFocusControl};
use super::device::SimDeviceSpec;
use crate::backend::{
    CameraCharacteristics, CameraManager, Deadline, PhysicalCamera, PhysicalStateCallback,
    UsbAttachListener, UsbDevice, UsbListenerId,
};
use crate::controls::{ExposureControl, ExposureMode, FocusControl, FocusMode};
use crate::error::OpenFailure;
use crate::identity::CameraName;

const SIM_VENDOR_ID: u16 = 0x046d;
const SIM_PRODUCT_ID: u16 = 0x0825;
const PERMISSION_DELAY: Duration = Duration::from_millis(2);

struct SimDevice {
    spec: SimDeviceSpec,
    /// OS device node while attached
    node: Option<String>,
    live: Vec<Arc<SimCamera>>,
    total_opens: usize,
    /// One-shot: unplug right after the next open, before it is reported
    detach_on_open: bool,
}

impl SimDevice {
    fn usb_device(&self, node: &str) -> Option<UsbDevice> {
        let serial = self.spec.name.serial_number()?;
        Some(UsbDevice {
            device_name: node.to_string(),
            serial_number: Some(serial.to_string()),
            vendor_id: SIM_VENDOR_ID,
            product_id: SIM_PRODUCT_ID,
        })
    }
}

#[derive(Default)]
struct SimState {
    devices: HashMap<CameraName, SimDevice>,
    listeners: Vec<(UsbListenerId, Arc<dyn UsbAttachListener>)>,
    next_listener: u64,
    next_node: u32,
}

pub(crate) struct SimShared {
    state: Mutex<SimState>,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn forget_camera(&self, name: &CameraName, camera: &SimCamera) {
        let mut state = self.lock();
        if let Some(device) = state.devices.get_mut(name) {
            device.live.retain(|live| !std::ptr::eq(Arc::as_ptr(live), camera));
        }
    }
}

/// In-process camera manager with scriptable hot-plug.
///
/// Opens, permission prompts and configuration acknowledgements all run on
/// their own threads, so callers see the same asynchrony as with real
/// hardware. Listener and state callbacks are never invoked with the
/// manager's lock held.
#[derive(Clone)]
pub struct SimCameraManager {
    shared: Arc<SimShared>,
}

impl Default for SimCameraManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCameraManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimShared {
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    /// Register a device. Webcams start plugged in.
    pub fn add_device(&self, spec: SimDeviceSpec) {
        let name = spec.name.clone();
        let is_webcam = name.is_webcam();
        {
            let mut state = self.shared.lock();
            state.devices.insert(
                name.clone(),
                SimDevice {
                    spec,
                    node: None,
                    live: Vec::new(),
                    total_opens: 0,
                    detach_on_open: false,
                },
            );
        }
        if is_webcam {
            self.plug(&name);
        }
    }

    /// Attach a webcam under a fresh device node.
    pub fn plug(&self, name: &CameraName) {
        let (device, listeners) = {
            let mut state = self.shared.lock();
            state.next_node += 1;
            let node = format!("/dev/bus/usb/001/{:03}", state.next_node);
            let Some(entry) = state.devices.get_mut(name) else {
                log::warn!("sim: plug of unknown device {}", name);
                return;
            };
            if entry.node.is_some() {
                return;
            }
            let Some(device) = entry.usb_device(&node) else {
                return;
            };
            entry.node = Some(node);
            let listeners: Vec<_> = state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (device, listeners)
        };
        log::info!("sim: attached {} at {}", name, device.device_name);
        for listener in listeners {
            listener.on_attached(&device);
        }
    }

    /// Detach a webcam: listeners hear about it, then every open handle
    /// on it closes.
    pub fn unplug(&self, name: &CameraName) {
        let (device, live, listeners) = {
            let mut state = self.shared.lock();
            let listeners: Vec<_> = state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            let Some(entry) = state.devices.get_mut(name) else {
                return;
            };
            let Some(node) = entry.node.take() else {
                return;
            };
            let device = entry.usb_device(&node);
            (device, std::mem::take(&mut entry.live), listeners)
        };
        if let Some(device) = &device {
            log::info!("sim: detached {} from {}", name, device.device_name);
            for listener in &listeners {
                listener.on_detached(device);
            }
        }
        for camera in live {
            camera.close_detached();
        }
    }

    pub fn set_open_failure(&self, name: &CameraName, failure: Option<OpenFailure>) {
        if let Some(device) = self.shared.lock().devices.get_mut(name) {
            device.spec.fail_open = failure;
        }
    }

    pub fn set_open_delay(&self, name: &CameraName, delay: Duration) {
        if let Some(device) = self.shared.lock().devices.get_mut(name) {
            device.spec.open_delay = delay;
        }
    }

    /// Unplug `name` once its next open has succeeded but before the
    /// opener hears about it.
    pub fn detach_during_next_open(&self, name: &CameraName) {
        if let Some(device) = self.shared.lock().devices.get_mut(name) {
            device.detach_on_open = true;
        }
    }

    pub fn set_permission_denied(&self, name: &CameraName, denied: bool) {
        if let Some(device) = self.shared.lock().devices.get_mut(name) {
            device.spec.deny_permission = denied;
        }
    }

    pub fn is_plugged(&self, name: &CameraName) -> bool {
        self.shared
            .lock()
            .devices
            .get(name)
            .map(|d| d.node.is_some() || !name.is_webcam())
            .unwrap_or(false)
    }

    /// Open physical handles on `name`.
    pub fn live_cameras(&self, name: &CameraName) -> usize {
        self.shared
            .lock()
            .devices
            .get(name)
            .map(|d| d.live.len())
            .unwrap_or(0)
    }

    /// Successful opens of `name` so far.
    pub fn total_opens(&self, name: &CameraName) -> usize {
        self.shared
            .lock()
            .devices
            .get(name)
            .map(|d| d.total_opens)
            .unwrap_or(0)
    }

    /// Whether any open handle on `name` is streaming.
    pub fn is_streaming(&self, name: &CameraName) -> bool {
        let live: Vec<_> = self
            .shared
            .lock()
            .devices
            .get(name)
            .map(|d| d.live.clone())
            .unwrap_or_default();
        live.iter().any(|camera| camera.is_streaming())
    }

    fn live_camera(&self, name: &CameraName) -> Option<Arc<SimCamera>> {
        let state = self.shared.lock();
        state.devices.get(name)?.live.last().cloned()
    }

    /// Exposure mode and value on the most recently opened handle.
    pub fn exposure(&self, name: &CameraName) -> Option<(ExposureMode, Option<Duration>)> {
        let camera = self.live_camera(name)?;
        let control = camera.exposure_handle()?;
        Some((control.mode(), control.exposure()))
    }

    /// Focus mode and length on the most recently opened handle.
    pub fn focus(&self, name: &CameraName) -> Option<(FocusMode, Option<f64>)> {
        let camera = self.live_camera(name)?;
        let control = camera.focus_handle()?;
        Some((control.mode(), control.focus_length()))
    }

    fn finish_open(
        shared: &Arc<SimShared>,
        name: &CameraName,
        callback: Arc<dyn PhysicalStateCallback>,
    ) -> Result<Arc<SimCamera>, OpenFailure> {
        let mut state = shared.lock();
        let device = state.devices.get_mut(name).ok_or(OpenFailure::Disconnected)?;
        if name.is_webcam() && device.node.is_none() {
            return Err(OpenFailure::Disconnected);
        }
        if let Some(reason) = device.spec.fail_open {
            return Err(reason);
        }
        let camera = SimCamera::new(SimCameraParts {
            name: name.clone(),
            device_node: device.node.clone(),
            exposure: device
                .spec
                .exposure
                .clone()
                .map(|caps| Arc::new(SimExposureControl::new(caps))),
            focus: device
                .spec
                .focus
                .clone()
                .map(|caps| Arc::new(SimFocusControl::new(caps))),
            frame_interval: device.spec.frame_interval,
            state_callback: callback,
            shared: Arc::downgrade(shared),
        });
        device.live.push(Arc::clone(&camera));
        device.total_opens += 1;
        Ok(camera)
    }
}

impl CameraManager for SimCameraManager {
    fn open_camera_assuming_permission(
        &self,
        name: &CameraName,
        deadline: Deadline,
        callback: Arc<dyn PhysicalStateCallback>,
    ) {
        let delay = self
            .shared
            .lock()
            .devices
            .get(name)
            .map(|d| d.spec.open_delay)
            .unwrap_or_default();
        let shared = Arc::clone(&self.shared);
        let name = name.clone();

        thread::spawn(move || {
            if delay > deadline.remaining() {
                thread::sleep(deadline.remaining());
                log::warn!("sim: open of {} missed its deadline", name);
                callback.on_open_failed(&name, OpenFailure::Timeout);
                return;
            }
            thread::sleep(delay);
            match Self::finish_open(&shared, &name, Arc::clone(&callback)) {
                Ok(camera) => {
                    log::debug!("sim: opened {}", name);
                    let detach = shared
                        .lock()
                        .devices
                        .get_mut(&name)
                        .map(|d| std::mem::take(&mut d.detach_on_open))
                        .unwrap_or(false);
                    if detach {
                        SimCameraManager { shared }.unplug(&name);
                    }
                    callback.on_opened(camera as Arc<dyn PhysicalCamera>);
                }
                Err(reason) => {
                    log::debug!("sim: open of {} failed: {}", name, reason);
                    callback.on_open_failed(&name, reason);
                }
            }
        });
    }

    fn request_permission(
        &self,
        name: &CameraName,
        _deadline: Deadline,
        on_result: Box<dyn FnOnce(bool) + Send>,
    ) {
        let granted = self
            .shared
            .lock()
            .devices
            .get(name)
            .map(|d| !d.spec.deny_permission)
            .unwrap_or(false);
        thread::spawn(move || {
            thread::sleep(PERMISSION_DELAY);
            on_result(granted);
        });
    }

    fn usb_devices(&self) -> Vec<UsbDevice> {
        let state = self.shared.lock();
        state
            .devices
            .values()
            .filter_map(|d| d.node.as_deref().and_then(|node| d.usb_device(node)))
            .collect()
    }

    fn register_usb_listener(&self, listener: Arc<dyn UsbAttachListener>) -> UsbListenerId {
        let mut state = self.shared.lock();
        state.next_listener += 1;
        let id = UsbListenerId(state.next_listener);
        state.listeners.push((id, listener));
        id
    }

    fn unregister_usb_listener(&self, id: UsbListenerId) {
        self.shared.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    fn characteristics(&self, name: &CameraName) -> Option<CameraCharacteristics> {
        let state = self.shared.lock();
        state.devices.get(name).map(|d| CameraCharacteristics {
            modes: d.spec.modes.clone(),
        })
    }
}
