//! Command-line flags and the validated configuration built from them.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use ml_core::DEFAULT_CONFIDENCE_THRESHOLD;
use serde::{Deserialize, Serialize};

use crate::{
    display::MINIMAL_FPS_WINDOW, scan::ScanTimings, session::SessionSettings,
    telemetry::TelemetryOptions,
};

pub const DEFAULT_MODEL_PATH: &str = "models/office_yolo.torchscript";

/// Delay before the camera is started automatically.
pub const AUTOSTART_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `ffmpeg` reading /dev/video<N> as raw BGR.
    Ffmpeg,
    /// OpenCV VideoCapture (requires the `with-opencv` feature).
    Opencv,
    /// Generated test pattern, no hardware needed.
    Synthetic,
}

#[derive(Debug, Parser)]
#[command(name = "rig-console", version, about = "Camera rig operator console")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Camera backend.
    #[arg(long, value_enum, default_value = "ffmpeg")]
    pub backend: Backend,
    /// Device indices tried in order.
    #[arg(long, value_delimiter = ',', default_value = "0,1,2")]
    pub device_indices: Vec<i32>,
    #[arg(long, default_value_t = 640)]
    pub width: u32,
    #[arg(long, default_value_t = 480)]
    pub height: u32,
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// TorchScript detection model.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,
    /// JSON object mapping class ids to labels.
    #[arg(long, value_name = "JSON")]
    pub labels: Option<PathBuf>,
    /// Minimum confidence kept (inclusive).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub confidence: f32,
    /// Run inference on the CPU even if CUDA is available.
    #[arg(long)]
    pub cpu: bool,

    #[arg(long, default_value_t = 33)]
    pub display_interval_ms: u64,
    #[arg(long, default_value_t = 10)]
    pub capture_yield_ms: u64,
    /// Wait after each scan move.
    #[arg(long)]
    pub settle_ms: Option<u64>,
    /// Time spent at each scan position.
    #[arg(long)]
    pub observe_ms: Option<u64>,
    /// Simple-viewer timings: 0.5 s FPS window and 1 s observation.
    #[arg(long)]
    pub minimal: bool,
    /// JSON array of six-angle scan positions; the first is the centre.
    #[arg(long, value_name = "JSON")]
    pub scan_positions: Option<PathBuf>,

    /// Do not start the camera on launch.
    #[arg(long)]
    pub no_autostart: bool,
    /// Directory for `snapshot` PNGs without an explicit path.
    #[arg(long, default_value = ".")]
    pub snapshot_dir: PathBuf,

    #[arg(long)]
    pub verbose: bool,
    /// Write a Chrome trace JSON file capturing spans.
    #[arg(long, value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Write Prometheus metrics text on exit.
    #[arg(long, value_name = "PATH")]
    pub metrics_dump: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Report which device indices open, then exit.
    Probe,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub backend: Backend,
    pub session: SessionSettings,
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub confidence: f32,
    pub use_cpu: bool,
    pub scan_positions: Option<PathBuf>,
    pub autostart: bool,
    pub snapshot_dir: PathBuf,
    #[serde(skip)]
    pub telemetry: TelemetryOptions,
}

impl ConsoleConfig {
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        if args.device_indices.is_empty() {
            bail!("--device-indices needs at least one index");
        }
        if args.width == 0 || args.height == 0 {
            bail!("--width and --height must be positive");
        }
        if !(args.fps.is_finite() && args.fps > 0.0) {
            bail!("--fps must be positive");
        }
        if !(0.0..=1.0).contains(&args.confidence) {
            bail!("--confidence must be between 0 and 1");
        }
        if args.display_interval_ms == 0 {
            bail!("--display-interval-ms must be positive");
        }

        let timings = if args.minimal {
            ScanTimings::minimal()
        } else {
            ScanTimings::default()
        };
        let defaults = SessionSettings::default();
        let session = SessionSettings {
            device_indices: args.device_indices.clone(),
            camera_width: args.width,
            camera_height: args.height,
            camera_fps: args.fps,
            capture_yield: Duration::from_millis(args.capture_yield_ms),
            display_interval: Duration::from_millis(args.display_interval_ms),
            fps_window: if args.minimal {
                MINIMAL_FPS_WINDOW
            } else {
                defaults.fps_window
            },
            settle: args
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(timings.settle),
            observe: args
                .observe_ms
                .map(Duration::from_millis)
                .unwrap_or(timings.observe),
            move_duration: timings.move_duration,
            stall_threshold: defaults.stall_threshold,
        };

        Ok(Self {
            backend: args.backend,
            session,
            model_path: args.model.clone(),
            labels_path: args.labels.clone(),
            confidence: args.confidence,
            use_cpu: args.cpu,
            scan_positions: args.scan_positions.clone(),
            autostart: !args.no_autostart,
            snapshot_dir: args.snapshot_dir.clone(),
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace.clone(),
                metrics_dump_path: args.metrics_dump.clone(),
                verbose: args.verbose,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("rig-console").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_match_the_console() {
        let config = ConsoleConfig::from_cli(&parse(&[])).unwrap();
        assert_eq!(config.backend, Backend::Ffmpeg);
        assert_eq!(config.session.device_indices, vec![0, 1, 2]);
        assert_eq!(config.session.display_interval, Duration::from_millis(33));
        assert_eq!(config.session.observe, Duration::from_secs(3));
        assert_eq!(config.confidence, 0.5);
        assert!(config.autostart);
    }

    #[test]
    fn minimal_shortens_fps_window_and_observation() {
        let config = ConsoleConfig::from_cli(&parse(&["--minimal", "--settle-ms", "250"])).unwrap();
        assert_eq!(config.session.fps_window, Duration::from_millis(500));
        assert_eq!(config.session.observe, Duration::from_secs(1));
        assert_eq!(config.session.settle, Duration::from_millis(250));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(ConsoleConfig::from_cli(&parse(&["--confidence", "1.5"])).is_err());
        assert!(ConsoleConfig::from_cli(&parse(&["--width", "0"])).is_err());
        assert!(ConsoleConfig::from_cli(&parse(&["--display-interval-ms", "0"])).is_err());
    }

    #[test]
    fn parses_backend_indices_and_probe() {
        let args = parse(&["--backend", "synthetic", "--device-indices", "3,1", "probe"]);
        assert!(matches!(args.command, Some(CliCommand::Probe)));
        let config = ConsoleConfig::from_cli(&args).unwrap();
        assert_eq!(config.backend, Backend::Synthetic);
        assert_eq!(config.session.device_indices, vec![3, 1]);
    }
}
