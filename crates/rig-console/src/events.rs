//! Messages consumed by the event-loop thread.
//!
//! Workers never touch session or display state directly; they post a
//! [`ConsoleEvent`] and the loop applies it. Operator commands travel over the
//! same queue so everything is applied in arrival order by one thread.

use std::{path::PathBuf, str::FromStr};

use crossbeam_channel::Sender;
use ml_core::Detection;
use thiserror::Error;

pub type EventSender = Sender<ConsoleEvent>;

/// Pan/tilt step used by the directional jog commands, in degrees.
pub const JOG_STEP_DEGREES: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// New detections from the capture worker of session `generation`.
    Detections {
        generation: u64,
        detections: Vec<Detection>,
    },
    /// Frame read failed; the capture worker has exited.
    CameraError { generation: u64, message: String },
    /// Scan run `scan` reached a position and is observing it (1-based).
    ScanPosition { scan: u64, index: usize, total: usize },
    ArmFault {
        scan: u64,
        index: usize,
        message: String,
    },
    /// The scan worker gave up after repeated arm failures.
    ScanAborted { scan: u64, reason: String },
    Command(OperatorCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    StartCamera,
    StopCamera,
    ToggleDetection,
    ToggleScanning,
    Jog { pan: i32, tilt: i32 },
    Center,
    ClearLog,
    Status,
    ShowLog,
    Snapshot(Option<PathBuf>),
    Help,
    Quit,
}

pub const COMMAND_HELP: &str = "commands: start | stop | detect | scan | up | down | left | right \
| center | clear | status | log | snapshot [path] | help | quit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
}

impl FromStr for OperatorCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let argument = words.next();
        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => OperatorCommand::StartCamera,
            "stop" => OperatorCommand::StopCamera,
            "detect" | "detection" => OperatorCommand::ToggleDetection,
            "scan" => OperatorCommand::ToggleScanning,
            "up" => OperatorCommand::Jog {
                pan: 0,
                tilt: JOG_STEP_DEGREES,
            },
            "down" => OperatorCommand::Jog {
                pan: 0,
                tilt: -JOG_STEP_DEGREES,
            },
            "left" => OperatorCommand::Jog {
                pan: -JOG_STEP_DEGREES,
                tilt: 0,
            },
            "right" => OperatorCommand::Jog {
                pan: JOG_STEP_DEGREES,
                tilt: 0,
            },
            "center" | "centre" => OperatorCommand::Center,
            "clear" => OperatorCommand::ClearLog,
            "status" => OperatorCommand::Status,
            "log" | "results" => OperatorCommand::ShowLog,
            "snapshot" => OperatorCommand::Snapshot(argument.map(PathBuf::from)),
            "help" | "?" => OperatorCommand::Help,
            "quit" | "exit" => OperatorCommand::Quit,
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directional_jogs() {
        assert_eq!(
            "left".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Jog { pan: -10, tilt: 0 })
        );
        assert_eq!(
            "  UP ".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Jog { pan: 0, tilt: 10 })
        );
    }

    #[test]
    fn snapshot_takes_an_optional_path() {
        assert_eq!(
            "snapshot".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Snapshot(None))
        );
        assert_eq!(
            "snapshot /tmp/a.png".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Snapshot(Some(PathBuf::from("/tmp/a.png"))))
        );
    }

    #[test]
    fn rejects_unknown_and_empty_lines() {
        assert_eq!(
            "dance".parse::<OperatorCommand>(),
            Err(ParseCommandError::Unknown("dance".into()))
        );
        assert_eq!(
            "   ".parse::<OperatorCommand>(),
            Err(ParseCommandError::Empty)
        );
    }
}
