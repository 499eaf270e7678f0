//! A group of physical cameras behind one logical camera.
//!
//! All members are opened up front. One of them is active at a time and
//! the active one can be changed without reopening anything: the running
//! capture sequence and the control proxies simply follow. Controls are
//! bounded by what every member supports, so any value they accept is
//! legal on whichever member becomes active.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::delegating::{CameraKind, DelegatingCamera, OPEN_GRACE};
use super::handle::{LogicalCamera, MemberState, Switchable};
use super::state::CameraStateCallback;
use crate::backend::{same_camera, CameraManager, Deadline, PhysicalCamera, PhysicalStateCallback};
use crate::config::CameraConfig;
use crate::continuation::Continuation;
use crate::error::{CameraErrorKind, CameraException, CameraExceptionKind, OpenFailure};
use crate::identity::CameraName;

/// Logical camera switching between several physical cameras.
pub type SwitchableCamera = DelegatingCamera<SwitchableKind>;

/// Members of a [`SwitchableCamera`].
pub struct SwitchableKind {
    members: Vec<CameraName>,
    infos: Mutex<Vec<SwitchableMemberInfo>>,
}

/// Book-keeping for one member.
#[derive(Clone)]
pub struct SwitchableMemberInfo {
    name: CameraName,
    camera: Option<Arc<dyn PhysicalCamera>>,
    state: MemberState,
}

impl SwitchableMemberInfo {
    fn new(name: CameraName) -> Self {
        Self {
            name,
            camera: None,
            state: MemberState::Opening,
        }
    }

    pub fn name(&self) -> &CameraName {
        &self.name
    }

    pub fn state(&self) -> MemberState {
        self.state
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SwitchableKind {
    fn infos(&self) -> MutexGuard<'_, Vec<SwitchableMemberInfo>> {
        lock(&self.infos)
    }

    /// Take every open member camera, marking it closed.
    fn take_open_members(&self) -> Vec<Arc<dyn PhysicalCamera>> {
        self.infos()
            .iter_mut()
            .filter_map(|info| {
                let camera = info.camera.take()?;
                info.state = MemberState::Closed;
                Some(camera)
            })
            .collect()
    }
}

impl CameraKind for SwitchableKind {
    fn limit_members(&self, _active: Option<&Arc<dyn PhysicalCamera>>) -> Vec<Arc<dyn PhysicalCamera>> {
        self.infos()
            .iter()
            .filter_map(|info| info.camera.clone())
            .collect()
    }

    fn close_physical(camera: &SwitchableCamera) {
        camera.change_delegated_camera(None);
        for member in camera.kind().take_open_members() {
            member.close();
        }
    }

    fn switchable(camera: &SwitchableCamera) -> Option<&dyn Switchable> {
        Some(camera)
    }
}

type MemberResult = (usize, Result<Arc<dyn PhysicalCamera>, OpenFailure>);

/// State callback for one member's physical open.
struct MemberCallback {
    index: usize,
    camera: Weak<SwitchableCamera>,
    waiter: Mutex<Option<Sender<MemberResult>>>,
}

impl MemberCallback {
    fn take_waiter(&self) -> Option<Sender<MemberResult>> {
        lock(&self.waiter).take()
    }
}

impl PhysicalStateCallback for MemberCallback {
    fn on_opened(&self, camera: Arc<dyn PhysicalCamera>) {
        match self.take_waiter() {
            Some(tx) => {
                if let Err(mpsc::SendError((_, Ok(orphan)))) = tx.send((self.index, Ok(camera))) {
                    orphan.close();
                }
            }
            None => {
                log::warn!("Member {} opened after the group gave up; closing it", camera.name());
                camera.close();
            }
        }
    }

    fn on_open_failed(&self, _name: &CameraName, reason: OpenFailure) {
        if let Some(tx) = self.take_waiter() {
            let _ = tx.send((self.index, Err(reason)));
        }
    }

    fn on_closed(&self, camera: &Arc<dyn PhysicalCamera>) {
        if let Some(group) = self.camera.upgrade() {
            group.on_member_closed(self.index, camera);
        }
    }

    fn on_error(&self, camera: &Arc<dyn PhysicalCamera>, error: CameraErrorKind) {
        let Some(group) = self.camera.upgrade() else {
            return;
        };
        if error == CameraErrorKind::Disconnected {
            group.on_member_closed(self.index, camera);
            return;
        }
        let active = group.lock().delegate().map(|c| same_camera(c, camera)).unwrap_or(false);
        if active {
            group.report_error(error);
        }
    }
}

impl DelegatingCamera<SwitchableKind> {
    /// Open a switchable camera over `members`.
    ///
    /// Nested switchable names are flattened and duplicates dropped. The
    /// open succeeds only if every member opens; the first member becomes
    /// the active camera.
    pub fn open(
        manager: Arc<dyn CameraManager>,
        members: Vec<CameraName>,
        config: CameraConfig,
        callback: Continuation<dyn CameraStateCallback>,
    ) {
        let name = CameraName::switchable(members);
        let members = name.members();
        if members.is_empty() {
            callback.dispatch(move |cb| cb.on_open_failed(&name, OpenFailure::OtherFailure));
            return;
        }

        let kind = SwitchableKind {
            infos: Mutex::new(members.iter().cloned().map(SwitchableMemberInfo::new).collect()),
            members,
        };
        let camera = match DelegatingCamera::new(name.clone(), manager, config, callback.clone(), kind)
        {
            Ok(camera) => camera,
            Err(e) => {
                log::error!("Failed to start executors for {}: {}", name, e);
                callback.dispatch(move |cb| cb.on_open_failed(&name, OpenFailure::InternalError));
                return;
            }
        };

        if !camera.submit_open_task(|camera| camera.open_members()) {
            camera.report_open_failed(OpenFailure::InternalError);
        }
    }

    fn set_member(&self, index: usize, camera: Option<Arc<dyn PhysicalCamera>>, state: MemberState) {
        if let Some(info) = self.kind().infos().get_mut(index) {
            info.camera = camera;
            info.state = state;
        }
    }

    /// Open every member in parallel; all must open before the deadline.
    fn open_members(&self) {
        let members = self.kind().members.clone();
        let deadline = Deadline::after(self.config().open_timeout());

        let (tx, rx) = mpsc::channel();
        let callbacks: Vec<Arc<MemberCallback>> = (0..members.len())
            .map(|index| {
                Arc::new(MemberCallback {
                    index,
                    camera: self.me(),
                    waiter: Mutex::new(Some(tx.clone())),
                })
            })
            .collect();
        drop(tx);

        log::info!("{}: opening {} members", self.camera_name(), members.len());
        for (member, callback) in members.iter().zip(&callbacks) {
            self.manager().open_camera_assuming_permission(
                member,
                deadline,
                Arc::clone(callback) as Arc<dyn PhysicalStateCallback>,
            );
        }

        let mut failure = None;
        let mut opened = 0;
        while opened < members.len() {
            match rx.recv_timeout(deadline.remaining() + OPEN_GRACE) {
                Ok((index, Ok(physical))) => {
                    log::debug!("{}: member {} opened", self.camera_name(), members[index]);
                    self.set_member(index, Some(physical), MemberState::Opened);
                    opened += 1;
                }
                Ok((index, Err(reason))) => {
                    log::warn!("{}: member {} failed: {}", self.camera_name(), members[index], reason);
                    self.set_member(index, None, MemberState::OpenFailed(reason));
                    failure = Some(reason);
                    break;
                }
                Err(_) => {
                    failure = Some(OpenFailure::Timeout);
                    break;
                }
            }
        }

        if let Some(reason) = failure {
            // Stragglers close themselves once their waiter is gone
            for callback in &callbacks {
                callback.take_waiter();
            }
            while let Ok((index, result)) = rx.try_recv() {
                if let Ok(physical) = result {
                    self.set_member(index, Some(physical), MemberState::Opened);
                }
            }
            for member in self.kind().take_open_members() {
                member.close();
            }
            self.report_open_failed(reason);
            return;
        }

        let first = self.kind().infos().first().and_then(|info| info.camera.clone());
        if first.is_none() || !self.change_delegated_camera(first) {
            for member in self.kind().take_open_members() {
                member.close();
            }
            self.report_open_failed(OpenFailure::CameraClosed);
            return;
        }
        self.open_self_and_report();
    }

    /// One member closing takes the whole group down.
    fn on_member_closed(&self, index: usize, physical: &Arc<dyn PhysicalCamera>) {
        let (others, session) = {
            let mut inner = self.lock();
            {
                let mut infos = self.kind().infos();
                let Some(info) = infos.get_mut(index) else {
                    return;
                };
                let current = info.camera.as_ref().map(|c| same_camera(c, physical)).unwrap_or(false);
                if !current {
                    return;
                }
                info.camera = None;
                info.state = MemberState::Closed;
            }
            log::info!("{}: member {} closed", self.camera_name(), physical.name());
            let others = self.kind().take_open_members();
            self.change_delegated_camera_locked(&mut inner, None);
            self.report_self_closed_locked(&mut inner);
            (others, inner.take_session())
        };
        if let Some(session) = session {
            session.close();
        }
        for member in others {
            member.close();
        }
    }
}

impl Switchable for DelegatingCamera<SwitchableKind> {
    fn members(&self) -> &[CameraName] {
        &self.kind().members
    }

    fn member_states(&self) -> Vec<(CameraName, MemberState)> {
        self.kind()
            .infos()
            .iter()
            .map(|info| (info.name.clone(), info.state))
            .collect()
    }

    fn active_camera(&self) -> Option<CameraName> {
        self.active_physical()
    }

    fn set_active_camera(&self, member: &CameraName) -> Result<(), CameraException> {
        if !self.kind().members.contains(member) {
            return Err(CameraException::new(
                CameraExceptionKind::UnknownMember,
                format!("{} is not a member of {}", member, self.camera_name()),
            ));
        }

        let mut inner = self.lock();
        if !inner.state.is_open() {
            return Err(CameraException::camera_closed(format!(
                "{} is {}",
                self.camera_name(),
                inner.state
            )));
        }
        let physical = self
            .kind()
            .infos()
            .iter()
            .find(|info| &info.name == member)
            .and_then(|info| info.camera.clone());
        let Some(physical) = physical else {
            return Err(CameraException::new(
                CameraExceptionKind::MemberNotOpen,
                format!("{} is not open", member),
            ));
        };

        self.change_delegated_camera_locked(&mut inner, Some(physical));
        log::info!("{}: active camera is now {}", self.camera_name(), member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{recorder, wait_until, StateEvent};
    use crate::camera::CameraHandle;
    use crate::sim::{SimCameraManager, SimDeviceSpec};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(3);

    fn open_pair(manager: &SimCameraManager) -> CameraHandle {
        manager.add_device(SimDeviceSpec::builtin("front"));
        manager.add_device(SimDeviceSpec::builtin("rear"));
        let (callback, events) = recorder();
        SwitchableCamera::open(
            Arc::new(manager.clone()),
            vec![CameraName::builtin("front"), CameraName::builtin("rear")],
            CameraConfig::default(),
            callback,
        );
        match events.recv_timeout(WAIT).unwrap() {
            StateEvent::Opened(handle) => handle,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_group_rejected() {
        let (callback, events) = recorder();
        SwitchableCamera::open(
            Arc::new(SimCameraManager::new()),
            Vec::new(),
            CameraConfig::default(),
            callback,
        );
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            StateEvent::OpenFailed(OpenFailure::OtherFailure)
        ));
    }

    #[test]
    fn test_member_lookup_errors() {
        let manager = SimCameraManager::new();
        let handle = open_pair(&manager);
        let group = handle.switchable().unwrap();

        let err = group.set_active_camera(&CameraName::builtin("side")).unwrap_err();
        assert_eq!(err.kind, CameraExceptionKind::UnknownMember);

        group.set_active_camera(&CameraName::builtin("rear")).unwrap();
        assert_eq!(group.active_camera(), Some(CameraName::builtin("rear")));
        assert!(group
            .member_states()
            .iter()
            .all(|(_, state)| *state == MemberState::Opened));
    }

    #[test]
    fn test_member_loss_closes_group() {
        let manager = SimCameraManager::new();
        let (callback, events) = recorder();
        manager.add_device(SimDeviceSpec::webcam("usb"));
        manager.add_device(SimDeviceSpec::builtin("front"));
        SwitchableCamera::open(
            Arc::new(manager.clone()),
            vec![CameraName::webcam("usb"), CameraName::builtin("front")],
            CameraConfig::default(),
            callback,
        );
        let _handle = match events.recv_timeout(WAIT).unwrap() {
            StateEvent::Opened(handle) => handle,
            other => panic!("unexpected {:?}", other),
        };

        manager.unplug(&CameraName::webcam("usb"));
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), StateEvent::Closed));
        assert!(wait_until(WAIT, || manager.live_cameras(&CameraName::builtin("front")) == 0));
    }
}
