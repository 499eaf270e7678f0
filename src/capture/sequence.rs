//! One start/stop streaming cycle of a capture session.
//!
//! A sequence keeps streaming across physical camera changes: when the
//! camera underneath goes away it pauses, when a camera comes back it
//! rebuilds the physical stream on the serial executor. Clients see one
//! frame counter for the whole sequence.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::types::{
    CameraFrame, CaptureCallback, CaptureRequest, CaptureSequenceId, CaptureSessionId,
    CaptureStatusCallback, StreamingState,
};
use super::SessionOwner;
use crate::backend::{
    same_binding, FrameCallback, PhysicalCamera, PhysicalCaptureSession, PhysicalSessionCallback,
};
use crate::continuation::Continuation;
use crate::error::CameraErrorKind;
use crate::executor::SerialExecutor;
use crate::refcount::RefCount;

pub(crate) struct DelegatingCaptureSequence {
    id: CaptureSequenceId,
    session_id: CaptureSessionId,
    request: CaptureRequest,
    frames: Continuation<dyn CaptureCallback>,
    status: Continuation<dyn CaptureStatusCallback>,
    serial: SerialExecutor,
    owner: Weak<dyn SessionOwner>,
    configure_timeout: Duration,
    refs: RefCount,
    inner: Mutex<SequenceInner>,
    me: Weak<Self>,
}

impl std::fmt::Debug for DelegatingCaptureSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingCaptureSequence")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

struct SequenceInner {
    state: StreamingState,
    /// Set by `stop`; a finished sequence never streams again
    finished: bool,
    camera: Option<Arc<dyn PhysicalCamera>>,
    stream: Option<Arc<dyn PhysicalCaptureSession>>,
    /// Bumped on every rebuild; stale streams and tasks compare against it
    generation: u64,
    next_frame_number: u64,
    last_frame_number: Option<u64>,
    report_on_close: bool,
    completion_reported: bool,
}

/// Parameters for a new sequence.
pub(crate) struct SequenceParams {
    pub id: CaptureSequenceId,
    pub session_id: CaptureSessionId,
    pub request: CaptureRequest,
    pub frames: Continuation<dyn CaptureCallback>,
    pub status: Continuation<dyn CaptureStatusCallback>,
    pub serial: SerialExecutor,
    pub owner: Weak<dyn SessionOwner>,
    pub configure_timeout: Duration,
    pub camera: Option<Arc<dyn PhysicalCamera>>,
}

enum ConfigureOutcome {
    Configured(Arc<dyn PhysicalCaptureSession>),
    Failed,
    Closed,
}

/// One-shot bridge from the physical session callback to `open_stream`.
struct ConfigureWaiter {
    tx: Mutex<Option<Sender<ConfigureOutcome>>>,
}

impl ConfigureWaiter {
    fn take(&self) -> Option<Sender<ConfigureOutcome>> {
        match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn abandon(&self) {
        self.take();
    }
}

impl PhysicalSessionCallback for ConfigureWaiter {
    fn on_configured(&self, session: Arc<dyn PhysicalCaptureSession>) {
        match self.take() {
            Some(tx) => {
                if let Err(mpsc::SendError(ConfigureOutcome::Configured(session))) =
                    tx.send(ConfigureOutcome::Configured(session))
                {
                    session.close();
                }
            }
            None => {
                log::warn!("Capture session configured after its deadline; closing it");
                session.close();
            }
        }
    }

    fn on_configure_failed(&self) {
        if let Some(tx) = self.take() {
            let _ = tx.send(ConfigureOutcome::Failed);
        }
    }

    fn on_closed(&self) {
        if let Some(tx) = self.take() {
            let _ = tx.send(ConfigureOutcome::Closed);
        }
    }
}

impl DelegatingCaptureSequence {
    pub(crate) fn new(params: SequenceParams) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: params.id,
            session_id: params.session_id,
            request: params.request,
            frames: params.frames,
            status: params.status,
            serial: params.serial,
            owner: params.owner,
            configure_timeout: params.configure_timeout,
            refs: RefCount::new(),
            inner: Mutex::new(SequenceInner {
                state: StreamingState::Stopped,
                finished: false,
                camera: params.camera,
                stream: None,
                generation: 0,
                next_frame_number: 0,
                last_frame_number: None,
                report_on_close: false,
                completion_reported: false,
            }),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SequenceInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn id(&self) -> CaptureSequenceId {
        self.id
    }

    pub(crate) fn state(&self) -> StreamingState {
        self.lock().state
    }

    /// Stopped → Started, or Paused when no camera is bound yet.
    pub(crate) fn start(&self) {
        let generation = {
            let mut inner = self.lock();
            if inner.finished || inner.state != StreamingState::Stopped {
                return;
            }
            if inner.camera.is_none() {
                log::debug!("{}: no camera bound, starting paused", self.id);
                inner.state = StreamingState::Paused;
                return;
            }
            inner.state = StreamingState::Started;
            inner.generation += 1;
            inner.generation
        };
        self.schedule_streaming(generation);
    }

    /// Point the sequence at a different physical camera (or none).
    pub(crate) fn on_camera_changed(&self, camera: Option<Arc<dyn PhysicalCamera>>) {
        let (old_stream, resume) = {
            let mut inner = self.lock();
            if same_binding(inner.camera.as_ref(), camera.as_ref()) {
                return;
            }
            inner.camera = camera;
            if inner.finished || inner.state == StreamingState::Stopped {
                return;
            }
            inner.generation += 1;
            let old_stream = inner.stream.take();
            let resume = if inner.camera.is_some() {
                inner.state = StreamingState::Started;
                Some(inner.generation)
            } else {
                inner.state = StreamingState::Paused;
                None
            };
            (old_stream, resume)
        };

        if let Some(stream) = old_stream {
            log::debug!("{}: tearing down physical stream", self.id);
            stream.stop_capture();
            stream.close();
        }
        if let Some(generation) = resume {
            self.schedule_streaming(generation);
        }
    }

    /// Final stop. Idempotent.
    pub(crate) fn stop(&self) {
        let (stream, completion) = {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            inner.state = StreamingState::Stopped;
            inner.generation += 1;
            let completion = if inner.report_on_close && !inner.completion_reported {
                inner.completion_reported = true;
                Some(inner.last_frame_number)
            } else {
                None
            };
            (inner.stream.take(), completion)
        };

        if let Some(stream) = stream {
            stream.stop_capture();
            stream.close();
        }
        if let Some(last_frame_number) = completion {
            let (session, sequence) = (self.session_id, self.id);
            self.status
                .dispatch(move |cb| cb.on_sequence_completed(session, sequence, last_frame_number));
        }
    }

    fn schedule_streaming(&self, generation: u64) {
        let weak = self.me.clone();
        let queued = self.serial.submit(move || {
            if let Some(sequence) = weak.upgrade() {
                sequence.do_streaming(generation);
            }
        });
        if !queued {
            log::debug!("{}: executor gone, not streaming", self.id);
        }
    }

    /// Build the physical stream for `generation`, unless it went stale.
    fn do_streaming(&self, generation: u64) {
        let camera = {
            let inner = self.lock();
            if inner.generation != generation
                || inner.state != StreamingState::Started
                || inner.stream.is_some()
            {
                return;
            }
            match &inner.camera {
                Some(camera) => Arc::clone(camera),
                None => return,
            }
        };

        // No lock is held while waiting on the device
        match self.open_stream(&camera, generation) {
            Ok(stream) => {
                let kept = {
                    let mut inner = self.lock();
                    if inner.generation == generation && inner.state == StreamingState::Started {
                        inner.stream = Some(Arc::clone(&stream));
                        inner.report_on_close = true;
                        true
                    } else {
                        false
                    }
                };
                if kept {
                    log::debug!("{}: streaming from {}", self.id, camera.name());
                } else {
                    stream.stop_capture();
                    stream.close();
                }
            }
            Err(error) => {
                let current = {
                    let inner = self.lock();
                    inner.generation == generation && !inner.finished
                };
                if current {
                    log::warn!("{}: streaming from {} failed: {}", self.id, camera.name(), error);
                    if let Some(owner) = self.owner.upgrade() {
                        owner.report_stream_error(&camera, error);
                    }
                } else {
                    log::debug!("{}: stale streaming attempt failed: {}", self.id, error);
                }
            }
        }
    }

    fn open_stream(
        &self,
        camera: &Arc<dyn PhysicalCamera>,
        generation: u64,
    ) -> Result<Arc<dyn PhysicalCaptureSession>, CameraErrorKind> {
        let (tx, rx) = mpsc::channel();
        let waiter = Arc::new(ConfigureWaiter {
            tx: Mutex::new(Some(tx)),
        });
        camera
            .create_capture_session(Arc::clone(&waiter) as Arc<dyn PhysicalSessionCallback>)
            .map_err(|e| e.error_kind())?;

        let stream = match rx.recv_timeout(self.configure_timeout) {
            Ok(ConfigureOutcome::Configured(stream)) => stream,
            Ok(ConfigureOutcome::Failed) => return Err(CameraErrorKind::ConfigureFailed),
            Ok(ConfigureOutcome::Closed) => return Err(CameraErrorKind::Disconnected),
            Err(_) => {
                waiter.abandon();
                // A configure that raced the timeout still has to be released
                if let Ok(ConfigureOutcome::Configured(late)) = rx.try_recv() {
                    late.close();
                }
                return Err(CameraErrorKind::Timeout);
            }
        };

        let weak = self.me.clone();
        let on_frame: FrameCallback = Arc::new(move |frame: CameraFrame| {
            if let Some(sequence) = weak.upgrade() {
                sequence.on_physical_frame(generation, frame);
            }
        });
        let physical_request = self.request.retarget(camera.name());
        if let Err(e) = stream.start_capture(&physical_request, on_frame) {
            stream.close();
            return Err(e.error_kind());
        }
        Ok(stream)
    }

    fn on_physical_frame(&self, generation: u64, frame: CameraFrame) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != StreamingState::Started {
            return;
        }
        let number = inner.next_frame_number;
        inner.next_frame_number += 1;
        inner.last_frame_number = Some(number);
        inner.report_on_close = true;

        // Queued while still locked so numbers reach the client in order
        let frame = frame.renumbered(self.id, number);
        let frames = self.frames.clone();
        let session = self.session_id;
        if !self
            .serial
            .submit(move || frames.dispatch(move |cb| cb.on_new_frame(session, frame)))
        {
            log::debug!("{}: frame {} dropped after shutdown", self.id, number);
        }
    }
}

/// Client handle to a capture sequence.
///
/// Cloning adds an external reference. When the last handle is dropped the
/// sequence stops asynchronously and its completion, if any, is reported.
pub struct CaptureSequence {
    sequence: Arc<DelegatingCaptureSequence>,
}

impl CaptureSequence {
    pub(crate) fn new(sequence: Arc<DelegatingCaptureSequence>) -> Self {
        sequence.refs.add_ref();
        Self { sequence }
    }

    pub fn id(&self) -> CaptureSequenceId {
        self.sequence.id
    }

    pub fn session_id(&self) -> CaptureSessionId {
        self.sequence.session_id
    }

    pub fn state(&self) -> StreamingState {
        self.sequence.state()
    }

    /// Stop streaming now. Other handles see the sequence as stopped.
    pub fn stop(&self) {
        self.sequence.stop();
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Clone for CaptureSequence {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.sequence))
    }
}

impl Drop for CaptureSequence {
    fn drop(&mut self) {
        if !self.sequence.refs.release() {
            return;
        }
        let sequence = Arc::clone(&self.sequence);
        if !self.sequence.serial.submit(move || sequence.stop()) {
            self.sequence.stop();
        }
    }
}

impl std::fmt::Debug for CaptureSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSequence")
            .field("id", &self.sequence.id)
            .field("session", &self.sequence.session_id)
            .finish()
    }
}
