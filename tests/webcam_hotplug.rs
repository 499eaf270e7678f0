//! Hot-plug behaviour of the resilient USB webcam on the simulated backend.

mod common;

use std::time::Duration;

use common::*;
use resilient_cam::capture::StreamingState;
use resilient_cam::controls::{ExposureControl, ExposureMode};
use resilient_cam::sim::{SimCameraManager, SimDeviceSpec};
use resilient_cam::{CameraName, LogicalCameraState, OpenFailure, UsbResilientWebcam};

fn plugged_webcam(serial: &str) -> (SimCameraManager, CameraName) {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::webcam(serial));
    (sim, CameraName::webcam(serial))
}

#[test]
fn test_opened_exactly_once() {
    let (sim, name) = plugged_webcam("ONCE");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);

    let camera = expect_opened(&events);
    assert_eq!(camera.name(), &name);
    assert_eq!(camera.state(), LogicalCameraState::OpenAndStarted);
    assert_eq!(camera.active_physical(), Some(name.clone()));
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(sim.total_opens(&name), 1);

    camera.release();
    expect_closed(&events);
    assert_eq!(sim.live_cameras(&name), 0);
}

#[test]
fn test_unplugged_webcam_fails_open() {
    let (sim, name) = plugged_webcam("GONE");
    sim.unplug(&name);
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name, fast_config(), callback);

    match events.recv_timeout(WAIT) {
        Ok(StateEvent::OpenFailed(reason)) => assert_eq!(reason, OpenFailure::Disconnected),
        other => panic!("expected on_open_failed, got {:?}", other),
    }
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_slow_open_times_out() {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::webcam("SLOW").open_delay(Duration::from_secs(2)));
    let name = CameraName::webcam("SLOW");
    let (callback, events) = state_recorder();
    let config = fast_config().with_open_timeout(Duration::from_millis(50));
    UsbResilientWebcam::open(manager(&sim), name.clone(), config, callback);

    match events.recv_timeout(WAIT) {
        Ok(StateEvent::OpenFailed(reason)) => assert_eq!(reason, OpenFailure::Timeout),
        other => panic!("expected on_open_failed, got {:?}", other),
    }
    assert_eq!(sim.live_cameras(&name), 0);
}

#[test]
fn test_detach_pauses_without_error_and_attach_resumes_numbering() {
    let (sim, name) = plugged_webcam("HOT");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
    let camera = expect_opened(&events);

    let capture = CaptureEvents::new();
    let session = camera
        .create_capture_session(capture.session_callback())
        .unwrap();
    let running = capture.start(&session, default_request(&camera)).unwrap();
    let sequence = running.id();

    let mut seen = capture.take_frames(5);

    sim.unplug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::Disconnected));
    assert!(wait_until(
        || session.active_sequence() == Some((sequence, StreamingState::Paused))
    ));
    assert_eq!(camera.active_physical(), None);
    // Unplugging is not an error and does not close anything
    assert!(events.recv_timeout(QUIET).is_err());
    seen.extend(capture.drain_frames());
    let before_replug = seen.len() as u64;

    sim.plug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::OpenAndStarted));
    assert_eq!(session.active_sequence(), Some((sequence, StreamingState::Started)));
    assert!(wait_until(|| {
        seen.extend(capture.drain_frames());
        seen.len() as u64 >= before_replug + 5
    }));

    // One counter across both physical streams, without gaps or repeats
    let expected: Vec<u64> = (0..seen.len() as u64).collect();
    assert_eq!(seen, expected);
    assert_eq!(sim.total_opens(&name), 2);
    assert!(capture.completed.try_recv().is_err());

    session.stop_capture();
    let (done, last) = capture.completed.recv_timeout(WAIT).unwrap();
    assert_eq!(done, sequence);
    assert!(last.unwrap() >= before_replug + 4);

    drop(session);
    camera.release();
    expect_closed(&events);
}

#[test]
fn test_exposure_survives_reconnect() {
    let (sim, name) = plugged_webcam("EXPO");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
    let camera = expect_opened(&events);

    let exposure = camera.exposure_control().expect("exposure control");
    assert!(exposure.is_bound());
    assert!(exposure.set_mode(ExposureMode::Manual));
    assert!(exposure.set_exposure(Duration::from_millis(20)));
    assert_eq!(
        sim.exposure(&name),
        Some((ExposureMode::Manual, Some(Duration::from_millis(20))))
    );

    sim.unplug(&name);
    assert!(wait_until(|| camera.active_physical().is_none()));
    assert_eq!(camera.state(), LogicalCameraState::Disconnected);
    assert!(!exposure.is_bound());
    // Cached values are still readable while detached
    assert_eq!(exposure.mode(), ExposureMode::Manual);
    assert_eq!(exposure.exposure(), Some(Duration::from_millis(20)));

    sim.plug(&name);
    assert!(wait_until(|| camera.active_physical().is_some()));
    assert!(exposure.is_bound());
    // The fresh device came up in its power-on mode; the cache was pushed onto it
    assert_eq!(
        sim.exposure(&name),
        Some((ExposureMode::Manual, Some(Duration::from_millis(20))))
    );

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_no_reopen_after_close() {
    let (sim, name) = plugged_webcam("DONE");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
    let camera = expect_opened(&events);

    sim.unplug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::Disconnected));
    let handle = camera.clone();
    camera.release();
    assert!(events.recv_timeout(QUIET).is_err());
    handle.release();
    expect_closed(&events);

    sim.plug(&name);
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(sim.total_opens(&name), 1);
    assert_eq!(sim.live_cameras(&name), 0);
}

#[test]
fn test_permission_refused_on_reattach_stays_disconnected() {
    let (sim, name) = plugged_webcam("DENY");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
    let camera = expect_opened(&events);

    sim.unplug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::Disconnected));
    sim.set_permission_denied(&name, true);
    sim.plug(&name);
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(camera.state(), LogicalCameraState::Disconnected);
    assert_eq!(sim.total_opens(&name), 1);

    // A later attach with permission granted recovers
    sim.unplug(&name);
    sim.set_permission_denied(&name, false);
    sim.plug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::OpenAndStarted));
    assert_eq!(sim.total_opens(&name), 2);

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_unplug_while_stream_starts_reports_nothing() {
    for round in 0..20 {
        let (sim, name) = plugged_webcam(&format!("EARLY{}", round));
        let (callback, events) = state_recorder();
        UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
        let camera = expect_opened(&events);

        let capture = CaptureEvents::new();
        let session = camera
            .create_capture_session(capture.session_callback())
            .unwrap();
        let running = capture.start(&session, default_request(&camera)).unwrap();
        sim.unplug(&name);

        assert_eq!(camera.state(), LogicalCameraState::Disconnected);
        assert!(wait_until(
            || session.active_sequence() == Some((running.id(), StreamingState::Paused))
        ));
        expect_no_event(&events);

        drop(running);
        drop(session);
        camera.release();
        expect_closed(&events);
    }
}

#[test]
fn test_detach_while_reopening_retries_on_next_attach() {
    let (sim, name) = plugged_webcam("FLAKY");
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);
    let camera = expect_opened(&events);

    sim.unplug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::Disconnected));
    sim.detach_during_next_open(&name);
    sim.plug(&name);

    // The reopen succeeds on a device that is already gone again
    assert!(wait_until(|| sim.total_opens(&name) == 2));
    expect_no_event(&events);
    assert_eq!(camera.state(), LogicalCameraState::Disconnected);
    assert_eq!(camera.active_physical(), None);
    assert_eq!(sim.live_cameras(&name), 0);

    sim.plug(&name);
    assert!(wait_until(|| camera.state() == LogicalCameraState::OpenAndStarted));
    assert_eq!(camera.active_physical(), Some(name.clone()));
    assert_eq!(sim.total_opens(&name), 3);
    assert_eq!(sim.live_cameras(&name), 1);

    camera.release();
    expect_closed(&events);
}

#[test]
fn test_detach_during_first_open_fails_open() {
    let (sim, name) = plugged_webcam("BLINK");
    sim.detach_during_next_open(&name);
    let (callback, events) = state_recorder();
    UsbResilientWebcam::open(manager(&sim), name.clone(), fast_config(), callback);

    match events.recv_timeout(WAIT) {
        Ok(StateEvent::OpenFailed(reason)) => assert_eq!(reason, OpenFailure::Disconnected),
        other => panic!("expected on_open_failed, got {:?}", other),
    }
    expect_no_event(&events);
    assert_eq!(sim.live_cameras(&name), 0);
}
