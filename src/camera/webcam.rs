//! USB webcam that survives being unplugged.
//!
//! The client opens the webcam once. When the device is detached the camera
//! stays open in `Disconnected`, capture sequences pause and the controls
//! fall back to their cached values. When a device with the same serial
//! number comes back, permission is requested again and the physical camera
//! is reopened and rebound. None of this is visible as a close/reopen.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::delegating::{CameraInner, CameraKind, DelegatingCamera, OPEN_GRACE};
use super::state::{CameraStateCallback, LogicalCameraState};
use crate::backend::{
    same_camera, CameraManager, Deadline, PhysicalCamera, PhysicalStateCallback, UsbAttachListener,
    UsbDevice, UsbListenerId,
};
use crate::config::CameraConfig;
use crate::continuation::Continuation;
use crate::error::{CameraErrorKind, OpenFailure};
use crate::identity::{self, CameraName, PermissionCallback};

/// Logical camera for exactly one USB webcam.
pub type UsbResilientWebcam = DelegatingCamera<WebcamKind>;

/// Hot-plug state of a [`UsbResilientWebcam`].
pub struct WebcamKind {
    serial_number: String,
    usb: Mutex<UsbState>,
    /// Single permit: disconnect and reopen processing never overlap
    gate: Mutex<()>,
}

#[derive(Debug, Default)]
struct UsbState {
    /// OS device node of the attached device
    device_name: Option<String>,
    connected: bool,
    listener: Option<UsbListenerId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WebcamKind {
    fn usb(&self) -> MutexGuard<'_, UsbState> {
        lock(&self.usb)
    }

    fn permit(&self) -> MutexGuard<'_, ()> {
        lock(&self.gate)
    }
}

impl CameraKind for WebcamKind {
    fn limit_members(&self, active: Option<&Arc<dyn PhysicalCamera>>) -> Vec<Arc<dyn PhysicalCamera>> {
        active.cloned().into_iter().collect()
    }

    fn close_physical(camera: &UsbResilientWebcam) {
        let listener = camera.kind().usb().listener.take();
        if let Some(id) = listener {
            camera.manager().unregister_usb_listener(id);
        }
        let _permit = camera.kind().permit();
        let delegate = {
            let mut inner = camera.lock();
            let delegate = inner.delegate().cloned();
            camera.change_delegated_camera_locked(&mut inner, None);
            delegate
        };
        if let Some(physical) = delegate {
            physical.close();
        }
    }
}

type OpenResult = Result<Arc<dyn PhysicalCamera>, OpenFailure>;

/// State callback for one physical open attempt.
struct WebcamStateCallback {
    camera: Weak<UsbResilientWebcam>,
    waiter: Mutex<Option<Sender<OpenResult>>>,
}

impl WebcamStateCallback {
    fn take_waiter(&self) -> Option<Sender<OpenResult>> {
        lock(&self.waiter).take()
    }
}

impl PhysicalStateCallback for WebcamStateCallback {
    fn on_opened(&self, camera: Arc<dyn PhysicalCamera>) {
        match self.take_waiter() {
            Some(tx) => {
                if let Err(mpsc::SendError(Ok(orphan))) = tx.send(Ok(camera)) {
                    orphan.close();
                }
            }
            None => {
                log::warn!("{} opened after its deadline; closing it", camera.name());
                camera.close();
            }
        }
    }

    fn on_open_failed(&self, _name: &CameraName, reason: OpenFailure) {
        if let Some(tx) = self.take_waiter() {
            let _ = tx.send(Err(reason));
        }
    }

    fn on_closed(&self, camera: &Arc<dyn PhysicalCamera>) {
        if let Some(webcam) = self.camera.upgrade() {
            webcam.on_physical_lost(camera);
        }
    }

    fn on_error(&self, camera: &Arc<dyn PhysicalCamera>, error: CameraErrorKind) {
        let Some(webcam) = self.camera.upgrade() else {
            return;
        };
        if error == CameraErrorKind::Disconnected {
            webcam.on_physical_lost(camera);
        } else if webcam.is_current(camera) {
            webcam.report_error(error);
        }
    }
}

struct WebcamUsbMonitor {
    camera: Weak<UsbResilientWebcam>,
}

impl UsbAttachListener for WebcamUsbMonitor {
    fn on_attached(&self, device: &UsbDevice) {
        if let Some(webcam) = self.camera.upgrade() {
            webcam.on_usb_attached(device);
        }
    }

    fn on_detached(&self, device: &UsbDevice) {
        if let Some(webcam) = self.camera.upgrade() {
            webcam.on_usb_detached(device);
        }
    }
}

struct PermissionWaiter {
    tx: Mutex<Sender<bool>>,
}

impl PermissionCallback for PermissionWaiter {
    fn on_permission_result(&self, _name: &CameraName, granted: bool) {
        let _ = lock(&self.tx).send(granted);
    }
}

impl DelegatingCamera<WebcamKind> {
    /// Open the webcam named `name`.
    ///
    /// Exactly one of `on_opened` / `on_open_failed` follows on `callback`.
    /// A failed initial open is final; hot-plug recovery only applies once
    /// the camera has opened.
    pub fn open(
        manager: Arc<dyn CameraManager>,
        name: CameraName,
        config: CameraConfig,
        callback: Continuation<dyn CameraStateCallback>,
    ) {
        let Some(serial_number) = name.serial_number().map(str::to_string) else {
            log::warn!("{} is not a USB webcam", name);
            callback.dispatch(move |cb| cb.on_open_failed(&name, OpenFailure::OtherFailure));
            return;
        };

        let device_name = manager
            .usb_devices()
            .into_iter()
            .find(|d| d.serial_number.as_deref() == Some(serial_number.as_str()))
            .map(|d| d.device_name);
        let kind = WebcamKind {
            serial_number,
            usb: Mutex::new(UsbState {
                connected: device_name.is_some(),
                device_name,
                listener: None,
            }),
            gate: Mutex::new(()),
        };

        let webcam = match DelegatingCamera::new(
            name.clone(),
            manager,
            config,
            callback.clone(),
            kind,
        ) {
            Ok(webcam) => webcam,
            Err(e) => {
                log::error!("Failed to start executors for {}: {}", name, e);
                callback.dispatch(move |cb| cb.on_open_failed(&name, OpenFailure::InternalError));
                return;
            }
        };

        let monitor = Arc::new(WebcamUsbMonitor {
            camera: Arc::downgrade(&webcam),
        });
        let id = webcam.manager().register_usb_listener(monitor);
        webcam.kind().usb().listener = Some(id);

        if !webcam.submit_open_task(|webcam| webcam.initial_open()) {
            webcam.report_open_failed(OpenFailure::InternalError);
        }
    }

    fn initial_open(&self) {
        let _permit = self.kind().permit();
        let physical = match self.open_assuming_permission() {
            Ok(physical) => physical,
            Err(reason) => {
                self.report_open_failed(reason);
                return;
            }
        };
        let outcome = {
            let mut inner = self.lock();
            if !self.still_attached(&physical) {
                Err(OpenFailure::Disconnected)
            } else if self.change_delegated_camera_locked(&mut inner, Some(Arc::clone(&physical))) {
                self.open_self_and_report_locked(&mut inner);
                Ok(())
            } else {
                Err(OpenFailure::CameraClosed)
            }
        };
        if let Err(reason) = outcome {
            physical.close();
            self.report_open_failed(reason);
        }
    }

    /// Whether the device `physical` was opened on is still attached.
    /// Checked with the camera lock held so a detach either sees the new
    /// binding or prevents it.
    fn still_attached(&self, physical: &Arc<dyn PhysicalCamera>) -> bool {
        let usb = self.kind().usb();
        if !usb.connected {
            return false;
        }
        match physical.usb_device_name() {
            Some(node) => usb.device_name.as_deref() == Some(node.as_str()),
            None => true,
        }
    }

    fn is_current(&self, camera: &Arc<dyn PhysicalCamera>) -> bool {
        self.lock()
            .delegate()
            .map(|current| same_camera(current, camera))
            .unwrap_or(false)
    }

    /// Open the physical device, blocking until it opens, fails or the
    /// open deadline passes. Only valid while the camera can still open.
    fn open_assuming_permission(&self) -> Result<Arc<dyn PhysicalCamera>, OpenFailure> {
        {
            let inner = self.lock();
            if !inner.state.can_open_physical() {
                return Err(OpenFailure::CameraClosed);
            }
        }

        let (tx, rx) = mpsc::channel();
        let callback = Arc::new(WebcamStateCallback {
            camera: self.me(),
            waiter: Mutex::new(Some(tx)),
        });
        let timeout = self.config().open_timeout();
        self.manager().open_camera_assuming_permission(
            self.camera_name(),
            Deadline::after(timeout),
            Arc::clone(&callback) as Arc<dyn PhysicalStateCallback>,
        );

        let physical = match rx.recv_timeout(timeout + OPEN_GRACE) {
            Ok(result) => result?,
            Err(_) => {
                callback.take_waiter();
                if let Ok(Ok(late)) = rx.try_recv() {
                    late.close();
                }
                log::warn!("{}: open timed out", self.camera_name());
                return Err(OpenFailure::Timeout);
            }
        };

        Ok(physical)
    }

    fn request_permission_blocking(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        let timeout = self.config().permission_timeout();
        identity::request_permission(
            self.manager().as_ref(),
            self.camera_name(),
            Deadline::after(timeout),
            Continuation::inline(Arc::new(PermissionWaiter { tx: Mutex::new(tx) })
                as Arc<dyn PermissionCallback>),
        );
        rx.recv_timeout(timeout + OPEN_GRACE).unwrap_or(false)
    }

    fn on_usb_detached(&self, device: &UsbDevice) {
        {
            let mut usb = self.kind().usb();
            if usb.device_name.as_deref() != Some(device.device_name.as_str()) {
                return;
            }
            usb.connected = false;
        }
        let lost = {
            let mut inner = self.lock();
            if !inner.state.is_open() {
                return;
            }
            self.unbind_locked(&mut inner)
        };
        log::info!("{}: detached from {}", self.camera_name(), device.device_name);
        if let Some(lost) = lost {
            self.submit_open_task(move |webcam| webcam.process_disconnect(lost));
        }
    }

    /// Mark the camera disconnected and drop its binding right away, so
    /// streams built on the lost device go stale before it closes.
    fn unbind_locked(&self, inner: &mut CameraInner) -> Option<Arc<dyn PhysicalCamera>> {
        inner.state = LogicalCameraState::Disconnected;
        let lost = inner.delegate().cloned();
        self.change_delegated_camera_locked(inner, None);
        lost
    }

    fn on_usb_attached(&self, device: &UsbDevice) {
        if device.serial_number.as_deref() != Some(self.kind().serial_number.as_str()) {
            return;
        }
        {
            let mut usb = self.kind().usb();
            if usb.connected {
                log::debug!("{}: already attached, ignoring {}", self.camera_name(), device.device_name);
                return;
            }
            usb.connected = true;
            usb.device_name = Some(device.device_name.clone());
        }
        if !self.lock().state.is_open() {
            return;
        }
        log::info!("{}: attached at {}", self.camera_name(), device.device_name);
        self.submit_open_task(|webcam| webcam.process_reopen());
    }

    /// The physical camera closed without a detach event.
    fn on_physical_lost(&self, camera: &Arc<dyn PhysicalCamera>) {
        {
            let mut inner = self.lock();
            if !inner.delegate().map(|c| same_camera(c, camera)).unwrap_or(false) {
                return;
            }
            if !inner.state.is_open() {
                return;
            }
            self.unbind_locked(&mut inner);
        }
        self.kind().usb().connected = false;
        log::info!("{}: physical camera lost", self.camera_name());
        let lost = Arc::clone(camera);
        self.submit_open_task(move |webcam| webcam.process_disconnect(lost));
    }

    /// Release a device that was already unbound. Holds the permit so a
    /// reopen never overlaps the close.
    fn process_disconnect(&self, lost: Arc<dyn PhysicalCamera>) {
        let _permit = self.kind().permit();
        log::debug!("{}: closing lost {}", self.camera_name(), lost.name());
        lost.close();
    }

    fn process_reopen(&self) {
        let _permit = self.kind().permit();
        {
            let inner = self.lock();
            if !inner.state.is_open() || inner.delegate().is_some() {
                return;
            }
        }

        if !self.request_permission_blocking() {
            log::warn!("{}: permission refused on re-attach", self.camera_name());
            self.kind().usb().connected = false;
            return;
        }

        match self.open_assuming_permission() {
            Ok(physical) => {
                let bound = {
                    let mut inner = self.lock();
                    inner.state.is_open()
                        && self.still_attached(&physical)
                        && self.change_delegated_camera_locked(&mut inner, Some(Arc::clone(&physical)))
                };
                if bound {
                    log::info!("{}: reconnected", self.camera_name());
                } else {
                    // Detached again while opening; the next attach retries
                    log::info!("{}: device went away while reopening", self.camera_name());
                    physical.close();
                }
            }
            Err(reason) => {
                // The next attach event retries
                log::warn!("{}: reopen failed: {}", self.camera_name(), reason);
                self.kind().usb().connected = false;
            }
        }
    }
}
