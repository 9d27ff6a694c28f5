//! The event loop: applies worker events and operator commands, drives the
//! display ticks, and wires up the collaborators from configuration.

use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::{Arc, Once},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use arm_control::{ArmDriver, ScanPlan, SimulatedArm};
use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use ml_core::{Detector, LabelTable};
use tracing::{debug, info, warn};
use video_ingest::{DeviceOpener, FfmpegOpener, SyntheticOpener};

use crate::{
    capture::DetectionSetup,
    config::{AUTOSTART_DELAY, Backend, ConsoleConfig},
    display::{DEFAULT_VIEWPORT, PreviewSurface, RenderSurface},
    events::{COMMAND_HELP, ConsoleEvent, EventSender, OperatorCommand},
    session::{Collaborators, Session},
    telemetry,
    watchdog::current_millis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    session: Session,
    surface: PreviewSurface,
    events: EventSender,
    inbox: Receiver<ConsoleEvent>,
    snapshot_dir: PathBuf,
    autostart_at: Option<Instant>,
    next_tick: Option<Instant>,
}

impl Console {
    /// `autostart` delays the first `start` by [`AUTOSTART_DELAY`].
    pub fn new(
        collaborators: Collaborators,
        config: &ConsoleConfig,
        autostart: Option<Duration>,
    ) -> Self {
        let (events, inbox) = unbounded();
        let session = Session::new(collaborators, config.session.clone(), events.clone());
        Self {
            session,
            surface: PreviewSurface::new(Some(DEFAULT_VIEWPORT)),
            events,
            inbox,
            snapshot_dir: config.snapshot_dir.clone(),
            autostart_at: autostart.map(|delay| Instant::now() + delay),
            next_tick: None,
        }
    }

    /// Sender for commands and worker events.
    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn surface(&self) -> &PreviewSurface {
        &self.surface
    }

    /// Run until `quit` or until every sender is gone.
    pub fn run(&mut self) -> Result<()> {
        info!("Console ready; {COMMAND_HELP}");
        loop {
            let received = match self.deadline() {
                Some(deadline) => self.inbox.recv_deadline(deadline),
                None => self
                    .inbox
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(event) => {
                    if self.dispatch(event)? == Flow::Quit {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.run_timers(Instant::now())?;
        }

        info!("Shutting down");
        self.session.shutdown();
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        match (self.next_tick, self.autostart_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn run_timers(&mut self, now: Instant) -> Result<()> {
        if self.autostart_at.is_some_and(|at| now >= at) {
            self.autostart_at = None;
            self.start_camera()?;
        }

        let Some(due) = self.next_tick else {
            return Ok(());
        };
        if now < due {
            return Ok(());
        }
        let outcome = self.session.tick_display(&mut self.surface, now);
        self.session.poll_watchdog(current_millis());
        self.next_tick = outcome
            .reschedule()
            .then(|| now + self.session.display_interval());
        Ok(())
    }

    fn start_camera(&mut self) -> Result<()> {
        self.session.start_camera()?;
        if self.session.is_running() {
            self.surface.show_message(None);
            if self.next_tick.is_none() {
                self.next_tick = Some(Instant::now());
            }
        } else {
            self.surface.show_message(Some("No Camera Found"));
        }
        Ok(())
    }

    fn dispatch(&mut self, event: ConsoleEvent) -> Result<Flow> {
        match event {
            ConsoleEvent::Command(command) => self.apply_command(command),
            event => {
                let camera_error = matches!(event, ConsoleEvent::CameraError { .. });
                self.session.handle_event(event);
                if camera_error && !self.session.is_running() {
                    self.surface.show_message(Some("Camera Error"));
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn apply_command(&mut self, command: OperatorCommand) -> Result<Flow> {
        debug!("command: {command:?}");
        match command {
            OperatorCommand::StartCamera => self.start_camera()?,
            OperatorCommand::StopCamera => {
                self.session.stop_camera();
                self.surface.show_message(Some("Camera Stopped"));
            }
            OperatorCommand::ToggleDetection => self.session.toggle_detection(),
            OperatorCommand::ToggleScanning => self.session.toggle_scanning()?,
            OperatorCommand::Jog { pan, tilt } => self.session.jog(pan, tilt),
            OperatorCommand::Center => self.session.center(),
            OperatorCommand::ClearLog => self.session.clear_log(),
            OperatorCommand::Status => self.print_status(),
            OperatorCommand::ShowLog => self.print_log(),
            OperatorCommand::Snapshot(path) => self.snapshot(path),
            OperatorCommand::Help => println!("{COMMAND_HELP}"),
            OperatorCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn print_status(&self) {
        let state = self.session.state();
        let state_json = serde_json::to_string(&state).unwrap_or_else(|err| err.to_string());
        println!(
            "Status: {} | {} | arm: {} pose {:?} | {}",
            self.session.status(),
            self.surface.fps_text(),
            self.session.arm_description(),
            self.session.pose(),
            state_json
        );
    }

    fn print_log(&self) {
        let results = self.session.results();
        if results.is_empty() {
            println!("(no detections)");
        }
        for line in results.lines() {
            println!("{line}");
        }
        for line in self.session.event_log().lines() {
            println!("  {line}");
        }
    }

    fn snapshot(&self, path: Option<PathBuf>) {
        let path = path.unwrap_or_else(|| {
            self.snapshot_dir.join(format!(
                "snapshot-{}.png",
                Local::now().format("%Y%m%d-%H%M%S")
            ))
        });
        match self.surface.snapshot(&path) {
            Ok(()) => println!("Saved {}", path.display()),
            Err(err) => warn!("Snapshot failed: {err:#}"),
        }
    }
}

/// Read operator commands from stdin and post them to the console.
pub fn spawn_stdin_reader(events: EventSender) -> io::Result<()> {
    telemetry::spawn_thread("rig-stdin", move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<OperatorCommand>() {
                Ok(command) => {
                    if events.send(ConsoleEvent::Command(command)).is_err() {
                        break;
                    }
                }
                Err(err) => println!("{err}; {COMMAND_HELP}"),
            }
        }
        debug!("stdin closed");
    })?;
    Ok(())
}

fn install_ctrlc(events: EventSender) {
    static CTRL_HANDLER: Once = Once::new();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            let _ = events.send(ConsoleEvent::Command(OperatorCommand::Quit));
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
}

pub fn build_opener(backend: Backend) -> Result<Arc<dyn DeviceOpener>> {
    match backend {
        Backend::Ffmpeg => Ok(Arc::new(FfmpegOpener::default())),
        Backend::Synthetic => Ok(Arc::new(SyntheticOpener {
            indices: vec![0, 1, 2],
            fail_after: None,
        })),
        #[cfg(feature = "with-opencv")]
        Backend::Opencv => Ok(Arc::new(video_ingest::OpenCvOpener)),
        #[cfg(not(feature = "with-opencv"))]
        Backend::Opencv => bail!("the opencv backend needs the `with-opencv` feature"),
    }
}

pub fn build_collaborators(config: &ConsoleConfig) -> Result<Collaborators> {
    let opener = build_opener(config.backend)?;

    let labels = match &config.labels_path {
        Some(path) => LabelTable::from_json_file(path)?,
        None => LabelTable::default(),
    };
    let detection = load_detector(config).map(|detector| {
        Arc::new(DetectionSetup {
            detector,
            labels,
            threshold: config.confidence,
        })
    });

    let plan = match &config.scan_positions {
        Some(path) => ScanPlan::from_json_file(path)?,
        None => ScanPlan::default(),
    };

    let arm: Arc<dyn ArmDriver> = Arc::new(SimulatedArm::new());
    info!("Arm: {} (Simulation Mode)", arm.describe());

    Ok(Collaborators {
        opener,
        detection,
        arm,
        plan,
    })
}

#[cfg(feature = "with-tch")]
fn load_detector(config: &ConsoleConfig) -> Option<Arc<dyn Detector>> {
    use ml_core::{TorchDetector, tch::Device};

    if !config.model_path.exists() {
        warn!(
            "Model not found at {}; detection disabled",
            config.model_path.display()
        );
        return None;
    }
    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    info!("Loading detection model from {}", config.model_path.display());
    match TorchDetector::new(&config.model_path, device, (640, 640)) {
        Ok(detector) => {
            info!("Detection model loaded on {:?}", detector.device());
            Some(Arc::new(
                detector.with_confidence_threshold(config.confidence.min(0.25)),
            ))
        }
        Err(err) => {
            tracing::error!("Failed to load detection model: {err:#}");
            None
        }
    }
}

#[cfg(not(feature = "with-tch"))]
fn load_detector(config: &ConsoleConfig) -> Option<Arc<dyn Detector>> {
    warn!(
        "Built without `with-tch`; ignoring model {}",
        config.model_path.display()
    );
    None
}

/// Run the interactive console until the operator quits.
pub fn run(config: ConsoleConfig) -> Result<()> {
    let collaborators = build_collaborators(&config)?;
    let autostart = config.autostart.then_some(AUTOSTART_DELAY);
    let mut console = Console::new(collaborators, &config, autostart);

    install_ctrlc(console.sender());
    spawn_stdin_reader(console.sender()).context("failed to spawn stdin reader")?;
    console.run()
}

/// Print which configured device indices open.
pub fn probe(config: &ConsoleConfig) -> Result<()> {
    let opener = build_opener(config.backend)?;
    let settings = video_ingest::CameraSettings {
        width: config.session.camera_width,
        height: config.session.camera_height,
        fps: config.session.camera_fps,
    };
    let mut found = 0;
    for &index in &config.session.device_indices {
        match opener.open(index, &settings) {
            Ok(mut source) => {
                println!("index {index}: {}", source.describe());
                source.release();
                found += 1;
            }
            Err(err) => println!("index {index}: {err}"),
        }
    }
    if found == 0 {
        bail!("no camera found at {:?}", config.session.device_indices);
    }
    Ok(())
}
