//! Operator console for a camera rig: capture and display relay, detection
//! overlay, and arm scanning, driven from a single event loop.

pub mod annotation;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod console;
pub mod display;
pub mod events;
pub mod reaper;
pub mod relay;
pub mod results;
pub mod scan;
pub mod session;
pub mod telemetry;
pub mod watchdog;

pub use cancel::CancelToken;
pub use capture::{CaptureWorker, DetectionSetup, spawn_capture_worker};
pub use config::{Backend, CliArgs, CliCommand, ConsoleConfig};
pub use console::Console;
pub use display::{DisplayScheduler, PreviewSurface, RenderSurface, TickOutcome};
pub use events::{ConsoleEvent, OperatorCommand};
pub use relay::{RELAY_CAPACITY, RelayQueue};
pub use scan::{ScanReport, ScanTimings, ScanWorker, spawn_scan_worker};
pub use session::{CameraState, Collaborators, Session, SessionSettings, SessionState};
