use std::{sync::Mutex, time::Duration};

use thiserror::Error;
use tracing::info;

use crate::servo::{ServoAngles, validate_angles};

/// Motion time handed to the servo controller for absolute moves.
pub const DEFAULT_MOVE_DURATION: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("servo {servo} angle {angle} is outside 0..=180")]
    AngleOutOfRange { servo: usize, angle: u16 },
    #[error("arm bus error: {0}")]
    Bus(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Multi-servo arm. Calls may block for the duration of the bus transaction.
pub trait ArmDriver: Send + Sync {
    fn describe(&self) -> String;

    /// `true` when moves are only logged.
    fn is_simulated(&self) -> bool;

    /// Absolute move of every servo over `duration`.
    fn move_all(&self, angles: &ServoAngles, duration: Duration) -> Result<(), ArmError>;
}

/// Stand-in used when no arm hardware is attached.
#[derive(Debug, Default)]
pub struct SimulatedArm {
    last: Mutex<Option<ServoAngles>>,
}

impl SimulatedArm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_pose(&self) -> Option<ServoAngles> {
        self.last.lock().ok().and_then(|guard| *guard)
    }
}

impl ArmDriver for SimulatedArm {
    fn describe(&self) -> String {
        "simulated arm".into()
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn move_all(&self, angles: &ServoAngles, duration: Duration) -> Result<(), ArmError> {
        validate_angles(angles)?;
        info!(
            "Simulated 6-servo move: {angles:?} over {} ms",
            duration.as_millis()
        );
        if let Ok(mut guard) = self.last.lock() {
            *guard = Some(*angles);
        }
        Ok(())
    }
}
