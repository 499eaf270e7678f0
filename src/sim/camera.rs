//! Simulated physical cameras and their capture sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use super::controls::{SimExposureControl, SimFocusControl};
use super::manager::SimShared;
use crate::backend::{
    FrameCallback, PhysicalCamera, PhysicalCaptureSession, PhysicalSessionCallback,
    PhysicalStateCallback,
};
use crate::capture::{CameraFrame, CaptureRequest, CaptureSequenceId};
use crate::controls::{ExposureControl, FocusControl};
use crate::error::{CameraErrorKind, CameraException, CameraExceptionKind};
use crate::identity::CameraName;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An open simulated camera.
pub struct SimCamera {
    name: CameraName,
    device_node: Option<String>,
    exposure: Option<Arc<SimExposureControl>>,
    focus: Option<Arc<SimFocusControl>>,
    frame_interval: Duration,
    state_callback: Arc<dyn PhysicalStateCallback>,
    shared: Weak<SimShared>,
    closed: AtomicBool,
    sessions: Mutex<Vec<Arc<SimCaptureSession>>>,
    me: Weak<SimCamera>,
}

pub(crate) struct SimCameraParts {
    pub name: CameraName,
    pub device_node: Option<String>,
    pub exposure: Option<Arc<SimExposureControl>>,
    pub focus: Option<Arc<SimFocusControl>>,
    pub frame_interval: Duration,
    pub state_callback: Arc<dyn PhysicalStateCallback>,
    pub shared: Weak<SimShared>,
}

impl SimCamera {
    pub(crate) fn new(parts: SimCameraParts) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: parts.name,
            device_node: parts.device_node,
            exposure: parts.exposure,
            focus: parts.focus,
            frame_interval: parts.frame_interval,
            state_callback: parts.state_callback,
            shared: parts.shared,
            closed: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether any capture session on this handle is producing frames.
    pub fn is_streaming(&self) -> bool {
        lock(&self.sessions)
            .iter()
            .any(|s| !s.closed.load(Ordering::SeqCst) && lock(&s.running).is_some())
    }

    pub(crate) fn exposure_handle(&self) -> Option<&Arc<SimExposureControl>> {
        self.exposure.as_ref()
    }

    pub(crate) fn focus_handle(&self) -> Option<&Arc<SimFocusControl>> {
        self.focus.as_ref()
    }

    /// Close without removing from the manager's live list; the caller
    /// already did.
    pub(crate) fn close_detached(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions = std::mem::take(&mut *lock(&self.sessions));
        for session in sessions {
            session.close();
        }
        log::debug!("sim: {} closed", self.name);

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let callback = Arc::clone(&self.state_callback);
        thread::spawn(move || {
            let camera: Arc<dyn PhysicalCamera> = me;
            callback.on_closed(&camera);
        });
    }
}

impl PhysicalCamera for SimCamera {
    fn name(&self) -> CameraName {
        self.name.clone()
    }

    fn usb_device_name(&self) -> Option<String> {
        self.device_node.clone()
    }

    fn create_capture_session(
        &self,
        callback: Arc<dyn PhysicalSessionCallback>,
    ) -> Result<(), CameraException> {
        if self.is_closed() {
            return Err(CameraException::camera_closed(format!("{} is closed", self.name)));
        }
        let session = Arc::new(SimCaptureSession {
            name: self.name.clone(),
            frame_interval: self.frame_interval,
            callback: Arc::clone(&callback),
            running: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        {
            let mut sessions = lock(&self.sessions);
            sessions.retain(|s| !s.closed.load(Ordering::SeqCst));
            sessions.push(Arc::clone(&session));
        }

        thread::spawn(move || {
            callback.on_configured(session);
        });
        Ok(())
    }

    fn exposure_control(&self) -> Option<Arc<dyn ExposureControl>> {
        self.exposure
            .clone()
            .map(|c| c as Arc<dyn ExposureControl>)
    }

    fn focus_control(&self) -> Option<Arc<dyn FocusControl>> {
        self.focus.clone().map(|c| c as Arc<dyn FocusControl>)
    }

    fn close(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.forget_camera(&self.name, self);
        }
        self.close_detached();
    }
}

/// A configured simulated capture session.
pub struct SimCaptureSession {
    name: CameraName,
    frame_interval: Duration,
    callback: Arc<dyn PhysicalSessionCallback>,
    running: Mutex<Option<Arc<AtomicBool>>>,
    closed: AtomicBool,
}

impl PhysicalCaptureSession for SimCaptureSession {
    fn start_capture(
        &self,
        request: &CaptureRequest,
        on_frame: FrameCallback,
    ) -> Result<(), CameraException> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CameraException::new(
                CameraExceptionKind::Streaming(CameraErrorKind::StreamingFailed),
                format!("capture session on {} is closed", self.name),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        if let Some(previous) = lock(&self.running).replace(Arc::clone(&running)) {
            previous.store(false, Ordering::SeqCst);
        }

        let interval = self.frame_interval;
        let request = request.clone();
        thread::spawn(move || {
            let mut frame_number = 0u64;
            loop {
                thread::sleep(interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let payload = frame_number.to_le_bytes();
                on_frame(CameraFrame {
                    sequence_id: CaptureSequenceId(0),
                    frame_number,
                    size: request.size,
                    format: request.format,
                    capture_time: Instant::now(),
                    data: Arc::from(&payload[..]),
                });
                frame_number += 1;
            }
        });
        Ok(())
    }

    fn stop_capture(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.store(false, Ordering::SeqCst);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_capture();
        self.callback.on_closed();
    }
}
