//! Session controller: the state the operator drives, owned by the event loop.
//!
//! Workers are started and stopped only from here. Each camera session gets a
//! new generation number and each scan run its own id; events tagged with a
//! generation or scan id that is no longer current are dropped, so a late
//! message from a stopped worker cannot touch the current session.
//!
//! Stopping never waits on a worker for more than [`STOP_GRACE`]; the join and
//! device release finish on a reaper thread.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use arm_control::{ArmDriver, ScanPlan, ServoAngles, jog};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use video_ingest::{
    CameraSettings, DeviceOpener, Frame, FrameSource, Interrupter, open_first_available,
};

use crate::{
    cancel::CancelToken,
    capture::{CaptureWorker, DEFAULT_CAPTURE_YIELD, DetectionSetup, spawn_capture_worker},
    display::{
        DEFAULT_FPS_WINDOW, DEFAULT_TICK_INTERVAL, DisplayScheduler, DisplaySources,
        RenderSurface, TickOutcome,
    },
    events::{ConsoleEvent, EventSender},
    reaper::{STOP_GRACE, reap},
    relay::RelayQueue,
    results::{EventLog, ResultsLog},
    scan::{ScanReport, ScanTimings, ScanWorker, spawn_scan_worker},
    watchdog::{CAPTURE_STALL_THRESHOLD, CaptureWatchdog, Heartbeat},
};

pub const STATUS_RUNNING: &str = "Camera Running";
pub const STATUS_DETECTING: &str = "Detecting objects...";
pub const STATUS_STOPPED: &str = "Stopped";
pub const STATUS_NO_CAMERA: &str = "No camera found";
pub const STATUS_CAMERA_ERROR: &str = "Camera Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CameraState {
    Stopped,
    Running { device_index: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub camera: CameraState,
    pub detecting: bool,
    pub scanning: bool,
}

/// Tunables for one console run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub device_indices: Vec<i32>,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: f64,
    pub capture_yield: Duration,
    pub display_interval: Duration,
    pub fps_window: Duration,
    pub settle: Duration,
    pub observe: Duration,
    pub move_duration: Duration,
    pub stall_threshold: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let camera = CameraSettings::default();
        let scan = ScanTimings::default();
        Self {
            device_indices: vec![0, 1, 2],
            camera_width: camera.width,
            camera_height: camera.height,
            camera_fps: camera.fps,
            capture_yield: DEFAULT_CAPTURE_YIELD,
            display_interval: DEFAULT_TICK_INTERVAL,
            fps_window: DEFAULT_FPS_WINDOW,
            settle: scan.settle,
            observe: scan.observe,
            move_duration: scan.move_duration,
            stall_threshold: CAPTURE_STALL_THRESHOLD,
        }
    }
}

impl SessionSettings {
    fn camera(&self) -> CameraSettings {
        CameraSettings {
            width: self.camera_width,
            height: self.camera_height,
            fps: self.camera_fps,
        }
    }

    fn scan_timings(&self) -> ScanTimings {
        ScanTimings {
            settle: self.settle,
            observe: self.observe,
            move_duration: self.move_duration,
        }
    }
}

/// External pieces the session drives.
pub struct Collaborators {
    pub opener: Arc<dyn DeviceOpener>,
    pub detection: Option<Arc<DetectionSetup>>,
    pub arm: Arc<dyn ArmDriver>,
    pub plan: ScanPlan,
}

struct RunningCapture {
    device_index: i32,
    token: CancelToken,
    interrupt: Option<Interrupter>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

struct RunningScan {
    id: u64,
    token: CancelToken,
    handle: JoinHandle<ScanReport>,
}

pub struct Session {
    collaborators: Collaborators,
    settings: SessionSettings,
    events: EventSender,
    raw: RelayQueue<Frame>,
    annotated: RelayQueue<Frame>,
    detecting: Arc<AtomicBool>,
    heartbeat: Arc<Heartbeat>,
    capture: Option<RunningCapture>,
    scan: Option<RunningScan>,
    display: DisplayScheduler,
    watchdog: CaptureWatchdog,
    results: ResultsLog,
    log: EventLog,
    status: String,
    pose: ServoAngles,
    generation: u64,
    scan_runs: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("status", &self.status)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(collaborators: Collaborators, settings: SessionSettings, events: EventSender) -> Self {
        let pose = collaborators.plan.center();
        let display =
            DisplayScheduler::new(settings.display_interval, settings.fps_window, Instant::now());
        let watchdog = CaptureWatchdog::new(settings.stall_threshold);
        Self {
            collaborators,
            settings,
            events,
            raw: RelayQueue::new("raw"),
            annotated: RelayQueue::new("annotated"),
            detecting: Arc::new(AtomicBool::new(false)),
            heartbeat: Arc::new(Heartbeat::new()),
            capture: None,
            scan: None,
            display,
            watchdog,
            results: ResultsLog::default(),
            log: EventLog::default(),
            status: STATUS_STOPPED.to_string(),
            pose,
            generation: 0,
            scan_runs: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            camera: match &self.capture {
                Some(capture) => CameraState::Running {
                    device_index: capture.device_index,
                },
                None => CameraState::Stopped,
            },
            detecting: self.detecting.load(Ordering::Relaxed),
            scanning: self.scan.is_some(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.capture.is_some()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn results(&self) -> &ResultsLog {
        &self.results
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn pose(&self) -> ServoAngles {
        self.pose
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn display_interval(&self) -> Duration {
        self.display.interval()
    }

    pub fn fps(&self) -> Option<f32> {
        self.display.fps()
    }

    pub fn has_detector(&self) -> bool {
        self.collaborators.detection.is_some()
    }

    pub fn arm_description(&self) -> String {
        self.collaborators.arm.describe()
    }

    pub fn start_camera(&mut self) -> Result<()> {
        if self.capture.is_some() {
            debug!("start_camera: already running");
            return Ok(());
        }

        let (device_index, source) = match open_first_available(
            self.collaborators.opener.as_ref(),
            &self.settings.device_indices,
            &self.settings.camera(),
        ) {
            Ok(found) => found,
            Err(err) => {
                warn!("{err}");
                self.set_status(STATUS_NO_CAMERA);
                return Ok(());
            }
        };

        self.generation += 1;
        self.raw.clear();
        self.annotated.clear();
        self.heartbeat.beat();
        self.watchdog.reset();
        self.display.reset(Instant::now());

        let token = CancelToken::new();
        let interrupt = source.interrupter();
        let handle = spawn_capture_worker(CaptureWorker {
            source,
            detection: self.collaborators.detection.clone(),
            raw: self.raw.clone(),
            annotated: self.annotated.clone(),
            detecting: self.detecting.clone(),
            heartbeat: self.heartbeat.clone(),
            events: self.events.clone(),
            token: token.clone(),
            yield_interval: self.settings.capture_yield,
            generation: self.generation,
        })
        .context("failed to spawn capture worker")?;

        self.capture = Some(RunningCapture {
            device_index,
            token,
            interrupt,
            handle,
        });
        self.set_status(STATUS_RUNNING);
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        let was_active = self.capture.is_some() || self.scan.is_some();

        self.stop_scan_worker();
        if let Some(capture) = self.capture.take() {
            capture.token.cancel();
            if let Some(interrupt) = &capture.interrupt {
                interrupt();
            }
            let device_index = capture.device_index;
            let released = reap("rig-capture", capture.handle, STOP_GRACE, move |joined| {
                match joined {
                    Ok(mut source) => {
                        source.release();
                        info!("Released camera {device_index}");
                    }
                    Err(_) => warn!("capture worker panicked; camera dropped with it"),
                }
            });
            if !released {
                warn!("Capture worker busy; camera {device_index} is released when its read returns");
                self.log
                    .push(format!("Camera {device_index} release pending"));
            }
        }

        self.detecting.store(false, Ordering::Relaxed);
        let dropped = self.raw.clear() + self.annotated.clear();
        if dropped > 0 {
            debug!("discarded {dropped} queued frames");
        }
        self.display.reset(Instant::now());
        self.watchdog.reset();

        if was_active {
            self.set_status(STATUS_STOPPED);
        }
    }

    /// Alias used on exit.
    pub fn shutdown(&mut self) {
        self.stop_camera();
    }

    /// Ignored while the camera is stopped; stopping always clears the flag.
    pub fn toggle_detection(&mut self) {
        if !self.is_running() {
            warn!("Start the camera before toggling detection");
            self.log.push("Start the camera before toggling detection");
            return;
        }
        let enabled = !self.detecting.load(Ordering::Relaxed);
        self.detecting.store(enabled, Ordering::Relaxed);
        if enabled {
            if self.collaborators.detection.is_none() {
                warn!("Detection enabled but no model is loaded; showing raw frames");
                self.log.push("No detection model loaded");
            }
            self.set_status(STATUS_DETECTING);
        } else {
            self.set_status(STATUS_RUNNING);
        }
    }

    pub fn toggle_scanning(&mut self) -> Result<()> {
        if self.scan.is_some() {
            self.stop_scan_worker();
            self.set_status("Scanning stopped");
            return Ok(());
        }
        if !self.is_running() {
            warn!("Start the camera before scanning");
            self.log.push("Start the camera before scanning");
            return Ok(());
        }

        self.scan_runs += 1;
        let id = self.scan_runs;
        let token = CancelToken::new();
        let handle = spawn_scan_worker(ScanWorker {
            arm: self.collaborators.arm.clone(),
            plan: self.collaborators.plan.clone(),
            timings: self.settings.scan_timings(),
            events: self.events.clone(),
            token: token.clone(),
            scan_id: id,
        })
        .context("failed to spawn scan worker")?;
        self.scan = Some(RunningScan { id, token, handle });
        self.set_status("Scanning...");
        Ok(())
    }

    /// Relative pan/tilt move from the tracked pose.
    pub fn jog(&mut self, pan_delta: i32, tilt_delta: i32) {
        let target = jog(&self.pose, pan_delta, tilt_delta);
        if self.move_arm(target) {
            self.log
                .push(format!("Arm pan {} tilt {}", target[0], target[1]));
        }
    }

    pub fn center(&mut self) {
        let center = self.collaborators.plan.center();
        if self.move_arm(center) {
            self.log.push("Arm centered");
        }
    }

    pub fn clear_log(&mut self) {
        self.results.clear();
    }

    /// Apply a worker event. Commands are dispatched by the console.
    pub fn handle_event(&mut self, event: ConsoleEvent) {
        match event_origin(&event) {
            Some(Origin::Camera(generation)) if generation != self.generation => {
                debug!("dropping event from stale session {generation}");
                return;
            }
            Some(Origin::Scan(id)) if self.scan.as_ref().map(|scan| scan.id) != Some(id) => {
                debug!("dropping event from finished scan {id}");
                return;
            }
            _ => {}
        }

        match event {
            ConsoleEvent::Detections { detections, .. } => {
                for det in &detections {
                    debug!(
                        "Detected {} ({:.2}) at {:?}",
                        det.label,
                        det.confidence,
                        det.center()
                    );
                }
                self.results.record(&detections, Local::now());
            }
            ConsoleEvent::CameraError { message, .. } => {
                self.log.push(format!("Camera error: {message}"));
                self.stop_camera();
                self.set_status(STATUS_CAMERA_ERROR);
            }
            ConsoleEvent::ScanPosition { index, total, .. } => {
                self.set_status(format!("Scanning position {index}/{total}"));
            }
            ConsoleEvent::ArmFault { index, message, .. } => {
                self.log
                    .push(format!("Arm fault at position {index}: {message}"));
            }
            ConsoleEvent::ScanAborted { reason, .. } => {
                self.stop_scan_worker();
                self.set_status(format!("Scanning aborted: {reason}"));
            }
            ConsoleEvent::Command(command) => {
                debug!("session ignores command {command:?}");
            }
        }
    }

    pub fn tick_display(&mut self, surface: &mut dyn RenderSurface, now: Instant) -> TickOutcome {
        let sources = DisplaySources {
            running: self.capture.is_some(),
            detecting: self.detecting.load(Ordering::Relaxed),
            raw: &self.raw,
            annotated: &self.annotated,
        };
        let _span = tracing::trace_span!("display.tick").entered();
        self.display.tick(sources, surface, now)
    }

    pub fn poll_watchdog(&mut self, now_ms: u64) {
        if self.capture.is_none() {
            return;
        }
        if let Some(age) = self.watchdog.check(&self.heartbeat, now_ms) {
            warn!("Capture stalled: no frame for {:.1}s", age.as_secs_f32());
            self.log
                .push(format!("Capture stalled: no frame for {:.1}s", age.as_secs_f32()));
        }
    }

    fn stop_scan_worker(&mut self) {
        let Some(scan) = self.scan.take() else {
            return;
        };
        scan.token.cancel();
        let id = scan.id;
        let finished = reap("rig-scan", scan.handle, STOP_GRACE, move |joined| match joined {
            Ok(report) => debug!("scan {id} finished: {report:?}"),
            Err(_) => warn!("scan worker panicked"),
        });
        if !finished {
            warn!("Scan {id} still waiting on the arm; it exits after the current move");
        }
    }

    fn move_arm(&mut self, target: ServoAngles) -> bool {
        match self
            .collaborators
            .arm
            .move_all(&target, self.settings.move_duration)
        {
            Ok(()) => {
                self.pose = target;
                true
            }
            Err(err) => {
                warn!("Arm move failed: {err}");
                self.log.push(format!("Arm move failed: {err}"));
                false
            }
        }
    }

    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        info!("Status: {status}");
        self.log.push(status.clone());
        self.status = status;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_camera();
    }
}

enum Origin {
    Camera(u64),
    Scan(u64),
}

fn event_origin(event: &ConsoleEvent) -> Option<Origin> {
    match event {
        ConsoleEvent::Detections { generation, .. }
        | ConsoleEvent::CameraError { generation, .. } => Some(Origin::Camera(*generation)),
        ConsoleEvent::ScanPosition { scan, .. }
        | ConsoleEvent::ArmFault { scan, .. }
        | ConsoleEvent::ScanAborted { scan, .. } => Some(Origin::Scan(*scan)),
        ConsoleEvent::Command(_) => None,
    }
}
