//! Switchable cameras on the simulated backend.

mod common;

use std::time::{Duration, Instant};

use common::*;
use resilient_cam::capture::StreamingState;
use resilient_cam::controls::{ExposureControl, ExposureMode, FocusControl, FocusMode};
use resilient_cam::sim::{ExposureCaps, FocusCaps, SimCameraManager, SimDeviceSpec};
use resilient_cam::{
    CameraExceptionKind, CameraName, LogicalCameraState, MemberState, OpenFailure,
    SwitchableCamera,
};

fn front() -> CameraName {
    CameraName::builtin("front")
}

fn rear() -> CameraName {
    CameraName::builtin("rear")
}

fn pair(sim: &SimCameraManager) -> Vec<CameraName> {
    sim.add_device(SimDeviceSpec::builtin("front"));
    sim.add_device(SimDeviceSpec::builtin("rear"));
    vec![front(), rear()]
}

#[test]
fn test_controls_are_bounded_by_every_member() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front").exposure(ExposureCaps {
        modes: vec![ExposureMode::Auto, ExposureMode::Manual],
        min: Duration::from_micros(100),
        max: Duration::from_millis(50),
        initial_mode: ExposureMode::Auto,
        initial: Duration::from_millis(10),
    }));
    sim.add_device(SimDeviceSpec::builtin("rear").exposure(ExposureCaps {
        modes: vec![
            ExposureMode::Auto,
            ExposureMode::ContinuousAuto,
            ExposureMode::Manual,
        ],
        min: Duration::from_millis(1),
        max: Duration::from_millis(100),
        initial_mode: ExposureMode::ContinuousAuto,
        initial: Duration::from_millis(10),
    }));

    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), vec![front(), rear()], fast_config(), callback);
    let camera = expect_opened(&events);

    let exposure = camera.exposure_control().expect("exposure control");
    assert_eq!(exposure.min_exposure(), Some(Duration::from_millis(1)));
    assert_eq!(exposure.max_exposure(), Some(Duration::from_millis(50)));
    assert!(exposure.is_mode_supported(ExposureMode::Manual));
    assert!(!exposure.is_mode_supported(ExposureMode::ContinuousAuto));
    assert!(!exposure.set_mode(ExposureMode::ContinuousAuto));

    assert!(exposure.set_mode(ExposureMode::Manual));
    // Legal on the front camera alone, but not on the group
    assert!(!exposure.set_exposure(Duration::from_micros(500)));
    assert!(!exposure.set_exposure(Duration::from_millis(80)));
    assert!(exposure.set_exposure(Duration::from_millis(30)));

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_member_without_focus_disables_group_focus() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front").focus(FocusCaps::default()));
    sim.add_device(SimDeviceSpec::builtin("rear").without_focus());

    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), vec![front(), rear()], fast_config(), callback);
    let camera = expect_opened(&events);

    let focus = camera.focus_control().expect("focus proxy exists");
    assert!(!focus.is_mode_supported(FocusMode::Fixed));
    assert!(!focus.is_focus_length_supported());
    assert!(!focus.set_focus_length(10.0));

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_member_failure_closes_opened_members() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front"));
    sim.add_device(
        SimDeviceSpec::builtin("rear")
            .open_delay(Duration::from_millis(30))
            .fail_open(OpenFailure::InUse),
    );

    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), vec![front(), rear()], fast_config(), callback);

    match events.recv_timeout(WAIT) {
        Ok(StateEvent::OpenFailed(reason)) => assert_eq!(reason, OpenFailure::InUse),
        other => panic!("expected on_open_failed, got {:?}", other),
    }
    assert!(wait_until(|| sim.live_cameras(&front()) == 0));
    assert_eq!(sim.total_opens(&front()), 1);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_open_waits_for_slowest_member() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front").open_delay(Duration::from_millis(10)));
    sim.add_device(SimDeviceSpec::builtin("rear").open_delay(Duration::from_millis(50)));

    let started = Instant::now();
    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), vec![front(), rear()], fast_config(), callback);
    let camera = expect_opened(&events);

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(camera.state(), LogicalCameraState::OpenAndStarted);
    let group = camera.switchable().expect("switchable");
    assert_eq!(group.members(), &[front(), rear()]);
    assert_eq!(group.active_camera(), Some(front()));
    assert_eq!(
        group.member_states(),
        vec![(front(), MemberState::Opened), (rear(), MemberState::Opened)]
    );

    camera.release();
    expect_closed(&events);
    assert_eq!(sim.live_cameras(&front()), 0);
    assert_eq!(sim.live_cameras(&rear()), 0);
}

#[test]
fn test_member_open_timeout_fails_group() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front"));
    sim.add_device(SimDeviceSpec::builtin("rear").open_delay(Duration::from_secs(2)));

    let (callback, events) = state_recorder();
    let config = fast_config().with_open_timeout(Duration::from_millis(80));
    SwitchableCamera::open(manager(&sim), vec![front(), rear()], config, callback);

    match events.recv_timeout(WAIT) {
        Ok(StateEvent::OpenFailed(reason)) => assert_eq!(reason, OpenFailure::Timeout),
        other => panic!("expected on_open_failed, got {:?}", other),
    }
    assert!(wait_until(|| sim.live_cameras(&front()) == 0));
    assert_eq!(sim.live_cameras(&rear()), 0);
}

#[test]
fn test_switching_moves_stream_and_controls() {
    let sim = SimCameraManager::new();
    let members = pair(&sim);
    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), members, fast_config(), callback);
    let camera = expect_opened(&events);

    let exposure = camera.exposure_control().expect("exposure control");
    assert!(exposure.set_mode(ExposureMode::Manual));
    assert!(exposure.set_exposure(Duration::from_millis(25)));

    let capture = CaptureEvents::new();
    let session = camera
        .create_capture_session(capture.session_callback())
        .unwrap();
    let running = capture.start(&session, default_request(&camera)).unwrap();
    let sequence = running.id();
    let mut seen = capture.take_frames(3);
    assert!(sim.is_streaming(&front()));

    let group = camera.switchable().expect("switchable");
    group.set_active_camera(&rear()).unwrap();
    assert_eq!(group.active_camera(), Some(rear()));
    assert!(wait_until(|| !sim.is_streaming(&front())));
    assert_eq!(
        sim.exposure(&rear()),
        Some((ExposureMode::Manual, Some(Duration::from_millis(25))))
    );

    assert!(wait_until(|| sim.is_streaming(&rear())));
    let resumed_at = seen.len() as u64;
    assert!(wait_until(|| {
        seen.extend(capture.drain_frames());
        seen.len() as u64 >= resumed_at + 3
    }));
    let expected: Vec<u64> = (0..seen.len() as u64).collect();
    assert_eq!(seen, expected);
    assert_eq!(session.active_sequence(), Some((sequence, StreamingState::Started)));
    // Switching never reopens anything
    assert_eq!(sim.total_opens(&front()), 1);
    assert_eq!(sim.total_opens(&rear()), 1);

    session.stop_capture();
    assert_eq!(capture.completed.recv_timeout(WAIT).unwrap().0, sequence);
    drop(session);
    camera.release();
    expect_closed(&events);
}

#[test]
fn test_unknown_member_rejected() {
    let sim = SimCameraManager::new();
    let members = pair(&sim);
    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), members, fast_config(), callback);
    let camera = expect_opened(&events);

    let group = camera.switchable().expect("switchable");
    let err = group
        .set_active_camera(&CameraName::webcam("ELSEWHERE"))
        .unwrap_err();
    assert_eq!(err.kind, CameraExceptionKind::UnknownMember);
    assert_eq!(group.active_camera(), Some(front()));

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_losing_a_member_closes_the_group() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::builtin("front"));
    sim.add_device(SimDeviceSpec::webcam("USBCAM"));
    let usb = CameraName::webcam("USBCAM");

    let (callback, events) = state_recorder();
    SwitchableCamera::open(manager(&sim), vec![front(), usb.clone()], fast_config(), callback);
    let camera = expect_opened(&events);

    sim.unplug(&usb);
    expect_closed(&events);
    assert_eq!(camera.state(), LogicalCameraState::Closed);
    assert!(wait_until(|| sim.live_cameras(&front()) == 0));

    let err = camera
        .switchable()
        .expect("switchable")
        .set_active_camera(&front())
        .unwrap_err();
    assert_eq!(err.kind, CameraExceptionKind::CameraClosed);

    // Replugging does not bring the group back
    sim.plug(&usb);
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(sim.total_opens(&usb), 1);
}
