//! Capture sessions on a logical camera.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::sequence::{CaptureSequence, DelegatingCaptureSequence, SequenceParams};
use super::types::{
    CaptureCallback, CaptureRequest, CaptureSequenceId, CaptureSessionCallback, CaptureSessionId,
    CaptureStatusCallback, StreamingState,
};
use super::SessionOwner;
use crate::backend::{CameraCharacteristics, PhysicalCamera};
use crate::continuation::Continuation;
use crate::error::{CameraException, CameraExceptionKind};
use crate::executor::SerialExecutor;
use crate::identity::CameraName;
use crate::refcount::RefCount;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Everything a new session needs from the camera creating it.
pub(crate) struct SessionParams {
    pub camera_name: CameraName,
    pub owner: Weak<dyn SessionOwner>,
    pub callback: Continuation<dyn CaptureSessionCallback>,
    pub serial: SerialExecutor,
    pub configure_timeout: Duration,
    pub characteristics: Option<CameraCharacteristics>,
    pub camera: Option<Arc<dyn PhysicalCamera>>,
}

/// Streaming context bound to one logical camera.
///
/// Holds at most one active sequence. The physical camera binding is
/// updated by the owning camera and forwarded to the sequence.
pub(crate) struct DelegatingCaptureSession {
    id: CaptureSessionId,
    camera_name: CameraName,
    owner: Weak<dyn SessionOwner>,
    callback: Continuation<dyn CaptureSessionCallback>,
    serial: SerialExecutor,
    configure_timeout: Duration,
    characteristics: Option<CameraCharacteristics>,
    refs: RefCount,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    camera: Option<Arc<dyn PhysicalCamera>>,
    sequence: Option<Arc<DelegatingCaptureSequence>>,
    next_sequence_id: u32,
    closed: bool,
    close_reported: bool,
}

impl DelegatingCaptureSession {
    pub(crate) fn new(params: SessionParams) -> Arc<Self> {
        let id = CaptureSessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("{} created on {}", id, params.camera_name);
        Arc::new(Self {
            id,
            camera_name: params.camera_name,
            owner: params.owner,
            callback: params.callback,
            serial: params.serial,
            configure_timeout: params.configure_timeout,
            characteristics: params.characteristics,
            refs: RefCount::new(),
            inner: Mutex::new(SessionInner {
                camera: params.camera,
                sequence: None,
                next_sequence_id: 0,
                closed: false,
                close_reported: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn id(&self) -> CaptureSessionId {
        self.id
    }

    fn validate(&self, request: &CaptureRequest) -> Result<(), CameraException> {
        if request.camera != self.camera_name {
            return Err(CameraException::new(
                CameraExceptionKind::InvalidRequest,
                format!("request targets {}, session is on {}", request.camera, self.camera_name),
            ));
        }
        if let Some(characteristics) = &self.characteristics {
            if !characteristics.supports(request) {
                return Err(CameraException::new(
                    CameraExceptionKind::InvalidRequest,
                    format!(
                        "{:?} {} @ {}fps is not supported by {}",
                        request.format, request.size, request.fps, self.camera_name
                    ),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn start_capture(
        &self,
        request: CaptureRequest,
        frames: Continuation<dyn CaptureCallback>,
        status: Continuation<dyn CaptureStatusCallback>,
    ) -> Result<Arc<DelegatingCaptureSequence>, CameraException> {
        self.validate(&request)?;

        let (prior, sequence) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(CameraException::new(
                    CameraExceptionKind::SessionClosed,
                    format!("{} is closed", self.id),
                ));
            }
            inner.next_sequence_id += 1;
            let sequence = DelegatingCaptureSequence::new(SequenceParams {
                id: CaptureSequenceId(inner.next_sequence_id),
                session_id: self.id,
                request,
                frames,
                status,
                serial: self.serial.clone(),
                owner: self.owner.clone(),
                configure_timeout: self.configure_timeout,
                camera: inner.camera.clone(),
            });
            let prior = inner.sequence.replace(Arc::clone(&sequence));
            (prior, sequence)
        };

        // The old stream must be gone before the new one is built
        if let Some(prior) = prior {
            prior.stop();
        }
        sequence.start();
        log::debug!("{}: started {}", self.id, sequence.id());
        Ok(sequence)
    }

    pub(crate) fn stop_capture(&self) {
        let sequence = self.lock().sequence.take();
        if let Some(sequence) = sequence {
            sequence.stop();
        }
    }

    pub(crate) fn active_sequence(&self) -> Option<(CaptureSequenceId, StreamingState)> {
        let sequence = self.lock().sequence.clone()?;
        match sequence.state() {
            StreamingState::Stopped => None,
            state => Some((sequence.id(), state)),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Called by the owning camera with its lock held.
    pub(crate) fn on_camera_changed(&self, camera: Option<Arc<dyn PhysicalCamera>>) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.camera = camera.clone();
        if let Some(sequence) = &inner.sequence {
            sequence.on_camera_changed(camera);
        }
    }

    /// Idempotent; `on_closed` reaches the client once.
    pub(crate) fn close(&self) {
        let (sequence, report) = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.camera = None;
            let report = !inner.close_reported;
            inner.close_reported = true;
            (inner.sequence.take(), report)
        };

        if let Some(sequence) = sequence {
            sequence.stop();
        }
        if report {
            let id = self.id;
            self.callback.dispatch(move |cb| cb.on_closed(id));
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.on_session_closed(self.id);
        }
        log::debug!("{} closed", self.id);
    }
}

/// Client handle to a capture session.
///
/// Cloning adds an external reference. When the last handle is dropped the
/// session closes asynchronously.
pub struct CaptureSession {
    session: Arc<DelegatingCaptureSession>,
}

impl CaptureSession {
    pub(crate) fn new(session: Arc<DelegatingCaptureSession>) -> Self {
        session.refs.add_ref();
        Self { session }
    }

    pub fn id(&self) -> CaptureSessionId {
        self.session.id
    }

    pub fn camera_name(&self) -> &CameraName {
        &self.session.camera_name
    }

    /// Start streaming `request`, replacing any running sequence.
    ///
    /// The sequence runs until it is replaced, `stop_capture` is called, the
    /// session closes or the last [`CaptureSequence`] handle is dropped.
    /// Fails with `InvalidRequest` when the request names another camera
    /// or a stream mode the camera cannot produce, and with
    /// `SessionClosed` after the session was closed.
    pub fn start_capture(
        &self,
        request: CaptureRequest,
        frames: Continuation<dyn CaptureCallback>,
        status: Continuation<dyn CaptureStatusCallback>,
    ) -> Result<CaptureSequence, CameraException> {
        self.session
            .start_capture(request, frames, status)
            .map(CaptureSequence::new)
    }

    pub fn stop_capture(&self) {
        self.session.stop_capture();
    }

    /// Id and state of the running sequence, if any.
    pub fn active_sequence(&self) -> Option<(CaptureSequenceId, StreamingState)> {
        self.session.active_sequence()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Clone for CaptureSession {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.session))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if !self.session.refs.release() {
            return;
        }
        let session = Arc::clone(&self.session);
        let queued = self.session.serial.submit(move || session.close());
        if !queued {
            self.session.close();
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.session.id)
            .field("camera", &self.session.camera_name)
            .finish()
    }
}
