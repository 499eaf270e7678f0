//! Subcommand handlers: the simulated streaming scenarios and config actions.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use resilient_cam::backend::CameraManager;
use resilient_cam::capture::{CaptureSequenceId, CaptureSessionId};
use resilient_cam::config::{default_path, CameraConfig};
use resilient_cam::sim::{SimCameraManager, SimDeviceSpec};
use resilient_cam::{
    CameraErrorKind, CameraFrame, CameraHandle, CameraName, CameraStateCallback, CaptureCallback,
    CaptureRequest, CaptureSequence, CaptureSession, CaptureSessionCallback, CaptureStatusCallback,
    Continuation,
    OpenFailure, SwitchableCamera, UsbResilientWebcam,
};

use super::args::ConfigAction;

/// Slack on top of the configured open timeout before giving up on a callback.
const CALLBACK_SLACK: Duration = Duration::from_millis(500);
const POLL: Duration = Duration::from_millis(20);

enum StateEvent {
    Opened(CameraHandle),
    OpenFailed(OpenFailure),
    Closed,
}

/// Forwards camera state callbacks to the scenario thread.
struct StateEvents(Mutex<Sender<StateEvent>>);

impl StateEvents {
    fn send(&self, event: StateEvent) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(event);
        }
    }
}

impl CameraStateCallback for StateEvents {
    fn on_opened(&self, camera: CameraHandle) {
        self.send(StateEvent::Opened(camera));
    }

    fn on_open_failed(&self, name: &CameraName, reason: OpenFailure) {
        log::warn!("{} failed to open: {}", name, reason);
        self.send(StateEvent::OpenFailed(reason));
    }

    fn on_closed(&self, name: &CameraName) {
        log::info!("{} closed", name);
        self.send(StateEvent::Closed);
    }

    fn on_error(&self, name: &CameraName, error: CameraErrorKind) {
        println!("  [{}] error: {}", name, error);
    }
}

/// Prints frame numbers and flags any gap in the sequence.
#[derive(Default)]
struct FramePrinter {
    last: Mutex<Option<u64>>,
    frames: AtomicU64,
    gaps: AtomicU64,
}

impl CaptureCallback for FramePrinter {
    fn on_new_frame(&self, _session: CaptureSessionId, frame: CameraFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let mut last = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            if frame.frame_number != prev + 1 {
                self.gaps.fetch_add(1, Ordering::Relaxed);
                println!("  gap: frame {} after {}", frame.frame_number, prev);
            }
        }
        *last = Some(frame.frame_number);
        if frame.frame_number % 25 == 0 {
            println!(
                "  {} frame {} ({} {:?})",
                frame.sequence_id, frame.frame_number, frame.size, frame.format
            );
        }
    }
}

impl CaptureStatusCallback for FramePrinter {
    fn on_sequence_completed(
        &self,
        _session: CaptureSessionId,
        sequence: CaptureSequenceId,
        last_frame_number: Option<u64>,
    ) {
        match last_frame_number {
            Some(n) => println!("  {} completed after frame {}", sequence, n),
            None => println!("  {} completed without frames", sequence),
        }
    }
}

impl CaptureSessionCallback for FramePrinter {
    fn on_closed(&self, session: CaptureSessionId) {
        log::info!("{} closed", session);
    }
}

/// Load the configuration, honouring an explicit path.
pub fn load_config(path: Option<&Path>) -> Result<CameraConfig, String> {
    CameraConfig::load(path).map_err(|e| e.to_string())
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config: &CameraConfig,
    path: Option<&Path>,
) -> Result<(), String> {
    match action {
        ConfigAction::Show => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
            if path.exists() {
                println!("# Config file: {} (exists)", path.display());
            } else {
                println!("# Config file: {} (not found, using defaults)", path.display());
            }
            let rendered = config
                .to_toml()
                .map_err(|e| format!("Failed to render config: {}", e))?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

/// Stream from one simulated webcam, unplugging it every `unplug_every` ms.
pub fn run_webcam(
    config: CameraConfig,
    serial: &str,
    seconds: u64,
    unplug_every: u64,
    stop: &AtomicBool,
) -> Result<(), String> {
    let sim = SimCameraManager::new();
    sim.add_device(SimDeviceSpec::webcam(serial));
    let name = CameraName::webcam(serial);

    let (events, rx) = state_events();
    let manager: Arc<dyn CameraManager> = Arc::new(sim.clone());
    UsbResilientWebcam::open(manager, name.clone(), config.clone(), events);
    let camera = wait_opened(&rx, &config)?;
    println!("Opened {} ({})", camera.name(), camera.state());

    let printer = Arc::new(FramePrinter::default());
    let (session, sequence) = start_streaming(&camera, &printer)?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let period = Duration::from_millis(unplug_every);
    let mut next_toggle = Instant::now() + period;
    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        if unplug_every > 0 && Instant::now() >= next_toggle {
            if sim.is_plugged(&name) {
                println!("-- unplug {}", name);
                sim.unplug(&name);
            } else {
                println!("-- plug {}", name);
                sim.plug(&name);
            }
            next_toggle += period;
        }
        std::thread::sleep(POLL);
    }

    finish(session, sequence, camera, &rx, &printer)
}

/// Stream from a switchable group, rotating the active member every `switch_every` ms.
pub fn run_switchable(
    config: CameraConfig,
    members: Vec<CameraName>,
    seconds: u64,
    switch_every: u64,
    stop: &AtomicBool,
) -> Result<(), String> {
    let sim = SimCameraManager::new();
    for member in &members {
        let spec = match member {
            CameraName::Webcam { serial_number } => SimDeviceSpec::webcam(serial_number.clone()),
            CameraName::Builtin { id } => SimDeviceSpec::builtin(id.clone()),
            other => return Err(format!("{} cannot be a group member", other)),
        };
        sim.add_device(spec);
    }

    let (events, rx) = state_events();
    let manager: Arc<dyn CameraManager> = Arc::new(sim);
    SwitchableCamera::open(manager, members, config.clone(), events);
    let camera = wait_opened(&rx, &config)?;
    println!("Opened {}", camera.name());

    let printer = Arc::new(FramePrinter::default());
    let (session, sequence) = start_streaming(&camera, &printer)?;

    let group = camera
        .switchable()
        .map(|s| s.members().to_vec())
        .unwrap_or_default();
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let period = Duration::from_millis(switch_every);
    let mut next_switch = Instant::now() + period;
    let mut active = 0;
    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        if switch_every > 0 && group.len() > 1 && Instant::now() >= next_switch {
            active = (active + 1) % group.len();
            if let Some(switchable) = camera.switchable() {
                match switchable.set_active_camera(&group[active]) {
                    Ok(()) => println!("-- active member is now {}", group[active]),
                    Err(e) => println!("-- switch to {} failed: {}", group[active], e),
                }
            }
            next_switch += period;
        }
        std::thread::sleep(POLL);
    }

    finish(session, sequence, camera, &rx, &printer)
}

fn state_events() -> (Continuation<dyn CameraStateCallback>, Receiver<StateEvent>) {
    let (tx, rx) = mpsc::channel();
    let callback: Arc<dyn CameraStateCallback> = Arc::new(StateEvents(Mutex::new(tx)));
    (Continuation::inline(callback), rx)
}

fn wait_opened(rx: &Receiver<StateEvent>, config: &CameraConfig) -> Result<CameraHandle, String> {
    let wait = config.permission_timeout() + config.open_timeout() + CALLBACK_SLACK;
    match rx.recv_timeout(wait) {
        Ok(StateEvent::Opened(camera)) => Ok(camera),
        Ok(StateEvent::OpenFailed(reason)) => Err(format!("Camera failed to open: {}", reason)),
        Ok(StateEvent::Closed) => Err("Camera closed while opening".to_string()),
        Err(_) => Err("Timed out waiting for the camera to open".to_string()),
    }
}

fn start_streaming(
    camera: &CameraHandle,
    printer: &Arc<FramePrinter>,
) -> Result<(CaptureSession, CaptureSequence), String> {
    let mode = camera
        .characteristics()
        .and_then(|c| c.modes.first().copied())
        .ok_or_else(|| format!("{} reports no stream modes", camera.name()))?;

    let session = camera
        .create_capture_session(Continuation::inline(
            printer.clone() as Arc<dyn CaptureSessionCallback>
        ))
        .map_err(|e| format!("Failed to create capture session: {}", e))?;
    let request = CaptureRequest::new(camera.name().clone(), mode.format, mode.size, mode.fps);
    let sequence = session
        .start_capture(
            request,
            Continuation::inline(printer.clone() as Arc<dyn CaptureCallback>),
            Continuation::inline(printer.clone() as Arc<dyn CaptureStatusCallback>),
        )
        .map_err(|e| format!("Failed to start capture: {}", e))?;
    println!(
        "Streaming {} at {} {:?} {} fps",
        sequence.id(),
        mode.size,
        mode.format,
        mode.fps
    );
    Ok((session, sequence))
}

fn finish(
    session: CaptureSession,
    sequence: CaptureSequence,
    camera: CameraHandle,
    rx: &Receiver<StateEvent>,
    printer: &FramePrinter,
) -> Result<(), String> {
    sequence.stop();
    sequence.release();
    session.release();
    camera.release();

    loop {
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(StateEvent::Closed) => break,
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Camera did not report closed");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!(
        "Done: {} frames, {} gaps",
        printer.frames.load(Ordering::Relaxed),
        printer.gaps.load(Ordering::Relaxed)
    );
    Ok(())
}
