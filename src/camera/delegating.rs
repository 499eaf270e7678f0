//! Shared core of every logical camera.
//!
//! A [`DelegatingCamera`] owns the state machine, the binding to the
//! physical camera currently doing the work, the capture session and the
//! control proxies. What differs between camera kinds (how physical
//! cameras are found, opened and closed) lives in a [`CameraKind`].
//!
//! Lock order is camera, then session, then sequence. Client callbacks are
//! queued on the camera's serial executor and never run under a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::handle::{CameraHandle, LogicalCamera, Switchable};
use super::state::{CameraStateCallback, LogicalCameraState};
use crate::backend::{
    same_binding, same_camera, CameraCharacteristics, CameraManager, PhysicalCamera,
};
use crate::capture::{
    CaptureSession, CaptureSessionCallback, CaptureSessionId, DelegatingCaptureSession,
    SessionOwner, SessionParams,
};
use crate::config::CameraConfig;
use crate::continuation::Continuation;
use crate::controls::{standard_controls, CameraControl, ControlType};
use crate::error::{CameraErrorKind, CameraException, OpenFailure};
use crate::executor::SerialExecutor;
use crate::identity::{self, CameraName};
use crate::refcount::RefCount;

/// Slack on top of a deadline before giving up on a manager callback.
pub(crate) const OPEN_GRACE: Duration = Duration::from_millis(250);

/// Behaviour specific to one kind of logical camera.
pub trait CameraKind: Send + Sync + Sized + 'static {
    /// Control proxies registered on the camera.
    fn construct_controls(&self) -> Vec<CameraControl> {
        standard_controls()
    }

    /// Physical cameras whose capabilities bound the control proxies.
    fn limit_members(&self, active: Option<&Arc<dyn PhysicalCamera>>) -> Vec<Arc<dyn PhysicalCamera>>;

    /// Close every physical camera during teardown. Runs on the open
    /// executor with no lock held.
    fn close_physical(camera: &DelegatingCamera<Self>);

    fn switchable(_camera: &DelegatingCamera<Self>) -> Option<&dyn Switchable> {
        None
    }
}

/// A logical camera backed by at most one physical camera at a time.
pub struct DelegatingCamera<K: CameraKind> {
    name: CameraName,
    manager: Arc<dyn CameraManager>,
    config: CameraConfig,
    listener: Continuation<dyn CameraStateCallback>,
    open_executor: SerialExecutor,
    serial: SerialExecutor,
    controls: Vec<CameraControl>,
    refs: RefCount,
    teardown_started: AtomicBool,
    inner: Mutex<CameraInner>,
    kind: K,
    me: Weak<Self>,
}

pub(crate) struct CameraInner {
    pub(crate) state: LogicalCameraState,
    delegate: Option<Arc<dyn PhysicalCamera>>,
    session: Option<Arc<DelegatingCaptureSession>>,
    last_error: Option<CameraErrorKind>,
}

impl CameraInner {
    pub(crate) fn delegate(&self) -> Option<&Arc<dyn PhysicalCamera>> {
        self.delegate.as_ref()
    }

    /// Detach the current session. Close it after the camera lock is released.
    pub(crate) fn take_session(&mut self) -> Option<Arc<DelegatingCaptureSession>> {
        self.session.take()
    }
}

impl<K: CameraKind> DelegatingCamera<K> {
    pub(crate) fn new(
        name: CameraName,
        manager: Arc<dyn CameraManager>,
        config: CameraConfig,
        listener: Continuation<dyn CameraStateCallback>,
        kind: K,
    ) -> std::io::Result<Arc<Self>> {
        let label = name.label();
        let open_executor = SerialExecutor::new(config.thread_name("open", &label))?;
        let serial = match SerialExecutor::new(config.thread_name("serial", &label)) {
            Ok(serial) => serial,
            Err(e) => {
                open_executor.shutdown();
                return Err(e);
            }
        };
        let controls = kind.construct_controls();

        Ok(Arc::new_cyclic(|me| Self {
            name,
            manager,
            config,
            listener,
            open_executor,
            serial,
            controls,
            refs: RefCount::new(),
            teardown_started: AtomicBool::new(false),
            inner: Mutex::new(CameraInner {
                state: LogicalCameraState::Nascent,
                delegate: None,
                session: None,
                last_error: None,
            }),
            kind,
            me: me.clone(),
        }))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CameraInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn camera_name(&self) -> &CameraName {
        &self.name
    }

    pub(crate) fn manager(&self) -> &Arc<dyn CameraManager> {
        &self.manager
    }

    pub(crate) fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub(crate) fn kind(&self) -> &K {
        &self.kind
    }

    pub(crate) fn me(&self) -> Weak<Self> {
        self.me.clone()
    }

    /// Queue `job` on the open executor with a strong reference to self.
    pub(crate) fn submit_open_task<F>(&self, job: F) -> bool
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let Some(me) = self.me.upgrade() else {
            return false;
        };
        let queued = self.open_executor.submit(move || job(&me));
        if !queued {
            log::debug!("{}: open executor is shut down", self.name);
        }
        queued
    }

    fn deliver<F>(&self, f: F)
    where
        F: FnOnce(&(dyn CameraStateCallback + 'static)) + Send + 'static,
    {
        let listener = self.listener.clone();
        if !self.serial.submit(move || listener.dispatch(f)) {
            log::warn!("{}: state callback dropped after shutdown", self.name);
        }
    }

    /// Nascent → open, handing the client its first reference.
    pub(crate) fn open_self_and_report(&self) -> bool {
        let mut inner = self.lock();
        self.open_self_and_report_locked(&mut inner)
    }

    pub(crate) fn open_self_and_report_locked(&self, inner: &mut CameraInner) -> bool {
        let Some(me) = self.me.upgrade() else {
            return false;
        };
        if inner.state != LogicalCameraState::Nascent {
            log::debug!("{}: already reported ({})", self.name, inner.state);
            return false;
        }
        inner.state = if inner.delegate.is_some() {
            LogicalCameraState::OpenAndStarted
        } else {
            LogicalCameraState::OpenNotStarted
        };
        log::info!("{} opened", self.name);
        let handle = CameraHandle::new(me as Arc<dyn LogicalCamera>);
        self.deliver(move |cb| cb.on_opened(handle));
        true
    }

    /// Nascent → FailedOpen. The camera is torn down afterwards.
    pub(crate) fn report_open_failed(&self, reason: OpenFailure) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != LogicalCameraState::Nascent {
                return false;
            }
            inner.state = LogicalCameraState::FailedOpen;
            log::warn!("{}: open failed: {}", self.name, reason);
            let name = self.name.clone();
            self.deliver(move |cb| cb.on_open_failed(&name, reason));
        }
        // No client reference was ever handed out
        self.begin_teardown();
        true
    }

    pub(crate) fn report_self_closed(&self) -> bool {
        let mut inner = self.lock();
        self.report_self_closed_locked(&mut inner)
    }

    pub(crate) fn report_self_closed_locked(&self, inner: &mut CameraInner) -> bool {
        let name = self.name.clone();
        match inner.state {
            LogicalCameraState::Closed => return false,
            LogicalCameraState::FailedOpen => {
                inner.state = LogicalCameraState::Closed;
                return false;
            }
            LogicalCameraState::Nascent => {
                inner.state = LogicalCameraState::Closed;
                self.deliver(move |cb| cb.on_open_failed(&name, OpenFailure::Disconnected));
            }
            _ => {
                inner.state = LogicalCameraState::Closed;
                self.deliver(move |cb| cb.on_closed(&name));
            }
        }
        log::info!("{} closed", self.name);
        true
    }

    /// Report a runtime error once; repeats are dropped until the camera is
    /// rebound. Nothing is reported while disconnected.
    pub(crate) fn report_error(&self, error: CameraErrorKind) -> bool {
        let mut inner = self.lock();
        self.report_error_locked(&mut inner, error)
    }

    fn report_error_locked(&self, inner: &mut CameraInner, error: CameraErrorKind) -> bool {
        if !inner.state.is_open()
            || inner.state == LogicalCameraState::Disconnected
            || inner.last_error == Some(error)
        {
            return false;
        }
        inner.last_error = Some(error);
        log::warn!("{}: {}", self.name, error);
        let name = self.name.clone();
        self.deliver(move |cb| cb.on_error(&name, error));
        true
    }

    pub(crate) fn change_delegated_camera(&self, camera: Option<Arc<dyn PhysicalCamera>>) -> bool {
        let mut inner = self.lock();
        self.change_delegated_camera_locked(&mut inner, camera)
    }

    /// Swap the physical binding and push it to controls and the session.
    ///
    /// Returns false when a terminal camera refuses a new binding; the
    /// caller still owns `camera` then.
    pub(crate) fn change_delegated_camera_locked(
        &self,
        inner: &mut CameraInner,
        camera: Option<Arc<dyn PhysicalCamera>>,
    ) -> bool {
        if camera.is_some() && inner.state.is_terminal() {
            log::debug!("{}: not binding, camera is {}", self.name, inner.state);
            return false;
        }
        if same_binding(inner.delegate.as_ref(), camera.as_ref()) {
            return true;
        }
        match &camera {
            Some(physical) => log::debug!("{}: delegating to {}", self.name, physical.name()),
            None => log::debug!("{}: unbound", self.name),
        }

        inner.delegate = camera.clone();
        if camera.is_some() {
            inner.last_error = None;
            if matches!(
                inner.state,
                LogicalCameraState::OpenNotStarted | LogicalCameraState::Disconnected
            ) {
                inner.state = LogicalCameraState::OpenAndStarted;
            }
        }

        let members = self.kind.limit_members(camera.as_ref());
        for control in &self.controls {
            control.on_camera_changed(camera.as_ref(), &members);
        }
        if let Some(session) = &inner.session {
            session.on_camera_changed(camera);
        }
        true
    }

    fn begin_teardown(&self) {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("{}: last reference released", self.name);
        self.submit_open_task(|camera| camera.teardown());
    }

    fn teardown(&self) {
        let session = self.lock().take_session();
        if let Some(session) = session {
            session.close();
        }
        K::close_physical(self);
        self.report_self_closed();
        // Queued callbacks still drain
        self.open_executor.shutdown();
        self.serial.shutdown();
    }
}

impl<K: CameraKind> SessionOwner for DelegatingCamera<K> {
    fn report_stream_error(&self, camera: &Arc<dyn PhysicalCamera>, error: CameraErrorKind) {
        let mut inner = self.lock();
        let bound = inner
            .delegate
            .as_ref()
            .map(|current| same_camera(current, camera))
            .unwrap_or(false);
        if !bound {
            log::debug!("{}: dropping {} from unbound {}", self.name, error, camera.name());
            return;
        }
        self.report_error_locked(&mut inner, error);
    }

    fn on_session_closed(&self, session: CaptureSessionId) {
        let mut inner = self.lock();
        if inner.session.as_ref().map(|s| s.id()) == Some(session) {
            inner.session = None;
        }
    }
}

impl<K: CameraKind> LogicalCamera for DelegatingCamera<K> {
    fn name(&self) -> &CameraName {
        &self.name
    }

    fn state(&self) -> LogicalCameraState {
        self.lock().state
    }

    fn active_physical(&self) -> Option<CameraName> {
        self.lock().delegate.as_ref().map(|camera| camera.name())
    }

    fn characteristics(&self) -> Option<CameraCharacteristics> {
        identity::projected_characteristics(self.manager.as_ref(), &self.name)
    }

    fn create_capture_session(
        &self,
        callback: Continuation<dyn CaptureSessionCallback>,
    ) -> Result<CaptureSession, CameraException> {
        let owner: Weak<dyn SessionOwner> = self.me.clone();
        let characteristics = self.characteristics();

        let (session, prior) = {
            let mut inner = self.lock();
            if !inner.state.is_open() {
                return Err(CameraException::camera_closed(format!(
                    "{} is {}",
                    self.name, inner.state
                )));
            }
            let session = DelegatingCaptureSession::new(SessionParams {
                camera_name: self.name.clone(),
                owner,
                callback,
                serial: self.serial.clone(),
                configure_timeout: self.config.configure_timeout(),
                characteristics,
                camera: inner.delegate.clone(),
            });
            let prior = inner.session.replace(Arc::clone(&session));
            (session, prior)
        };

        if let Some(prior) = prior {
            prior.close();
        }
        Ok(CaptureSession::new(session))
    }

    fn control(&self, control_type: ControlType) -> Option<CameraControl> {
        self.controls
            .iter()
            .find(|control| control.control_type() == control_type)
            .cloned()
    }

    fn switchable(&self) -> Option<&dyn Switchable> {
        K::switchable(self)
    }

    fn add_external_ref(&self) -> usize {
        self.refs.add_ref()
    }

    fn release_external_ref(&self) {
        if self.refs.release() {
            self.begin_teardown();
        }
    }
}

impl<K: CameraKind> Drop for DelegatingCamera<K> {
    fn drop(&mut self) {
        self.open_executor.shutdown();
        self.serial.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{recorder, StateEvent};
    use crate::capture::CaptureSessionId;
    use crate::sim::SimCameraManager;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    struct BareKind;

    impl CameraKind for BareKind {
        fn limit_members(
            &self,
            active: Option<&Arc<dyn PhysicalCamera>>,
        ) -> Vec<Arc<dyn PhysicalCamera>> {
            active.cloned().into_iter().collect()
        }

        fn close_physical(camera: &DelegatingCamera<Self>) {
            camera.change_delegated_camera(None);
        }
    }

    struct StubCamera(&'static str);

    impl PhysicalCamera for StubCamera {
        fn name(&self) -> CameraName {
            CameraName::builtin(self.0)
        }

        fn usb_device_name(&self) -> Option<String> {
            None
        }

        fn create_capture_session(
            &self,
            _callback: Arc<dyn crate::backend::PhysicalSessionCallback>,
        ) -> Result<(), CameraException> {
            Err(CameraException::camera_closed("stub"))
        }

        fn exposure_control(&self) -> Option<Arc<dyn crate::controls::ExposureControl>> {
            None
        }

        fn focus_control(&self) -> Option<Arc<dyn crate::controls::FocusControl>> {
            None
        }

        fn close(&self) {}
    }

    fn bare_camera() -> (Arc<DelegatingCamera<BareKind>>, mpsc::Receiver<StateEvent>) {
        let (callback, events) = recorder();
        let camera = DelegatingCamera::new(
            CameraName::builtin("test"),
            Arc::new(SimCameraManager::new()),
            CameraConfig::default(),
            callback,
            BareKind,
        )
        .unwrap();
        (camera, events)
    }

    #[test]
    fn test_open_reported_once() {
        let (camera, events) = bare_camera();
        assert!(camera.open_self_and_report());
        assert!(!camera.open_self_and_report());
        assert!(!camera.report_open_failed(OpenFailure::Timeout));

        let handle = match events.recv_timeout(WAIT).unwrap() {
            StateEvent::Opened(handle) => handle,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(handle.state(), LogicalCameraState::OpenNotStarted);
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_open_failure_is_terminal() {
        let (camera, events) = bare_camera();
        assert!(camera.report_open_failed(OpenFailure::InUse));
        assert!(!camera.open_self_and_report());
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            StateEvent::OpenFailed(OpenFailure::InUse)
        ));
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_errors_deduplicated_until_rebind() {
        let (camera, events) = bare_camera();
        camera.open_self_and_report();
        let _handle = events.recv_timeout(WAIT).unwrap();

        assert!(camera.report_error(CameraErrorKind::Timeout));
        assert!(!camera.report_error(CameraErrorKind::Timeout));
        assert!(camera.report_error(CameraErrorKind::ConfigureFailed));
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            StateEvent::Error(CameraErrorKind::Timeout)
        ));
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            StateEvent::Error(CameraErrorKind::ConfigureFailed)
        ));
    }

    #[test]
    fn test_stream_errors_only_from_bound_connected_camera() {
        let (camera, events) = bare_camera();
        let bound: Arc<dyn PhysicalCamera> = Arc::new(StubCamera("bound"));
        let stale: Arc<dyn PhysicalCamera> = Arc::new(StubCamera("stale"));
        assert!(camera.change_delegated_camera(Some(Arc::clone(&bound))));
        camera.open_self_and_report();
        let _handle = events.recv_timeout(WAIT).unwrap();

        camera.report_stream_error(&stale, CameraErrorKind::StreamingFailed);
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        camera.lock().state = LogicalCameraState::Disconnected;
        camera.report_stream_error(&bound, CameraErrorKind::Disconnected);
        assert!(!camera.report_error(CameraErrorKind::Timeout));
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        camera.lock().state = LogicalCameraState::OpenAndStarted;
        camera.report_stream_error(&bound, CameraErrorKind::StreamingFailed);
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            StateEvent::Error(CameraErrorKind::StreamingFailed)
        ));
    }

    #[test]
    fn test_last_release_closes_once() {
        let (camera, events) = bare_camera();
        camera.open_self_and_report();
        let handle = match events.recv_timeout(WAIT).unwrap() {
            StateEvent::Opened(handle) => handle,
            other => panic!("unexpected {:?}", other),
        };
        let second = handle.clone();
        drop(handle);
        assert_eq!(camera.state(), LogicalCameraState::OpenNotStarted);

        second.release();
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), StateEvent::Closed));
        assert_eq!(camera.state(), LogicalCameraState::Closed);
        assert!(!camera.report_self_closed());
        assert!(!camera.open_self_and_report());
    }

    #[test]
    fn test_new_session_closes_prior() {
        let (camera, events) = bare_camera();
        camera.open_self_and_report();
        let _handle = events.recv_timeout(WAIT).unwrap();

        let (tx, closed) = mpsc::channel();
        let first = camera
            .create_capture_session(crate::camera::testing::session_recorder(tx.clone()))
            .unwrap();
        let second = camera
            .create_capture_session(crate::camera::testing::session_recorder(tx))
            .unwrap();

        let closed_id: CaptureSessionId = closed.recv_timeout(WAIT).unwrap();
        assert_eq!(closed_id, first.id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(closed.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
