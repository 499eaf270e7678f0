//! Shared helpers for the integration tests: recording callbacks over
//! channels and a fast configuration.

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use resilient_cam::backend::CameraManager;
use resilient_cam::capture::{CaptureSequenceId, CaptureSessionId};
use resilient_cam::sim::SimCameraManager;
use resilient_cam::{
    CameraConfig, CameraErrorKind, CameraFrame, CameraHandle, CameraName, CameraStateCallback,
    CaptureCallback, CaptureRequest, CaptureSequence, CaptureSession, CaptureSessionCallback,
    CaptureStatusCallback, Continuation, OpenFailure,
};

pub const WAIT: Duration = Duration::from_secs(3);
pub const QUIET: Duration = Duration::from_millis(150);

#[derive(Debug)]
pub enum StateEvent {
    Opened(CameraHandle),
    OpenFailed(OpenFailure),
    Closed,
    Error(CameraErrorKind),
}

struct StateRecorder(Mutex<Sender<StateEvent>>);

impl StateRecorder {
    fn send(&self, event: StateEvent) {
        let _ = self.0.lock().unwrap().send(event);
    }
}

impl CameraStateCallback for StateRecorder {
    fn on_opened(&self, camera: CameraHandle) {
        self.send(StateEvent::Opened(camera));
    }
    fn on_open_failed(&self, _name: &CameraName, reason: OpenFailure) {
        self.send(StateEvent::OpenFailed(reason));
    }
    fn on_closed(&self, _name: &CameraName) {
        self.send(StateEvent::Closed);
    }
    fn on_error(&self, _name: &CameraName, error: CameraErrorKind) {
        self.send(StateEvent::Error(error));
    }
}

pub fn state_recorder() -> (Continuation<dyn CameraStateCallback>, Receiver<StateEvent>) {
    let (tx, rx) = mpsc::channel();
    let callback: Arc<dyn CameraStateCallback> = Arc::new(StateRecorder(Mutex::new(tx)));
    (Continuation::inline(callback), rx)
}

/// Timeouts short enough that failing tests fail fast.
pub fn fast_config() -> CameraConfig {
    CameraConfig::default()
        .with_open_timeout(Duration::from_millis(500))
        .with_configure_timeout(Duration::from_millis(500))
        .with_permission_timeout(Duration::from_millis(500))
}

pub fn manager(sim: &SimCameraManager) -> Arc<dyn CameraManager> {
    Arc::new(sim.clone())
}

pub fn expect_opened(events: &Receiver<StateEvent>) -> CameraHandle {
    match events.recv_timeout(WAIT) {
        Ok(StateEvent::Opened(camera)) => camera,
        other => panic!("expected on_opened, got {:?}", other),
    }
}

/// Nothing but silence on the state callback for `QUIET`.
pub fn expect_no_event(events: &Receiver<StateEvent>) {
    if let Ok(event) = events.recv_timeout(QUIET) {
        panic!("unexpected state event {:?}", event);
    }
}

pub fn expect_closed(events: &Receiver<StateEvent>) {
    loop {
        match events.recv_timeout(WAIT) {
            Ok(StateEvent::Closed) => return,
            Ok(StateEvent::Error(_)) => continue,
            other => panic!("expected on_closed, got {:?}", other),
        }
    }
}

/// Frames, completions and session closes, each on its own channel.
pub struct CaptureEvents {
    pub frames: Receiver<(CaptureSequenceId, u64)>,
    pub completed: Receiver<(CaptureSequenceId, Option<u64>)>,
    pub closed: Receiver<CaptureSessionId>,
    sink: Arc<CaptureSink>,
}

struct CaptureSink {
    frames: Mutex<Sender<(CaptureSequenceId, u64)>>,
    completed: Mutex<Sender<(CaptureSequenceId, Option<u64>)>>,
    closed: Mutex<Sender<CaptureSessionId>>,
}

impl CaptureCallback for CaptureSink {
    fn on_new_frame(&self, _session: CaptureSessionId, frame: CameraFrame) {
        let _ = self
            .frames
            .lock()
            .unwrap()
            .send((frame.sequence_id, frame.frame_number));
    }
}

impl CaptureStatusCallback for CaptureSink {
    fn on_sequence_completed(
        &self,
        _session: CaptureSessionId,
        sequence: CaptureSequenceId,
        last_frame_number: Option<u64>,
    ) {
        let _ = self.completed.lock().unwrap().send((sequence, last_frame_number));
    }
}

impl CaptureSessionCallback for CaptureSink {
    fn on_closed(&self, session: CaptureSessionId) {
        let _ = self.closed.lock().unwrap().send(session);
    }
}

impl CaptureEvents {
    pub fn new() -> Self {
        let (frames_tx, frames) = mpsc::channel();
        let (completed_tx, completed) = mpsc::channel();
        let (closed_tx, closed) = mpsc::channel();
        Self {
            frames,
            completed,
            closed,
            sink: Arc::new(CaptureSink {
                frames: Mutex::new(frames_tx),
                completed: Mutex::new(completed_tx),
                closed: Mutex::new(closed_tx),
            }),
        }
    }

    pub fn session_callback(&self) -> Continuation<dyn CaptureSessionCallback> {
        Continuation::inline(self.sink.clone() as Arc<dyn CaptureSessionCallback>)
    }

    pub fn start(
        &self,
        session: &CaptureSession,
        request: CaptureRequest,
    ) -> Result<CaptureSequence, resilient_cam::CameraException> {
        session.start_capture(
            request,
            Continuation::inline(self.sink.clone() as Arc<dyn CaptureCallback>),
            Continuation::inline(self.sink.clone() as Arc<dyn CaptureStatusCallback>),
        )
    }

    /// Receive the next `n` frame numbers.
    pub fn take_frames(&self, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| self.frames.recv_timeout(WAIT).expect("frame").1)
            .collect()
    }

    /// Everything already queued.
    pub fn drain_frames(&self) -> Vec<u64> {
        self.frames.try_iter().map(|(_, n)| n).collect()
    }
}

/// First stream mode the camera offers, as a request.
pub fn default_request(camera: &CameraHandle) -> CaptureRequest {
    let mode = camera
        .characteristics()
        .and_then(|c| c.modes.first().copied())
        .expect("camera has stream modes");
    CaptureRequest::new(camera.name().clone(), mode.format, mode.size, mode.fps)
}

/// Poll `condition` until it holds or `WAIT` passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
