//! Servo arm collaborator: the driver seam, a simulated driver, and the preset
//! scan table.

mod driver;
mod plan;
mod servo;

pub use driver::{ArmDriver, ArmError, DEFAULT_MOVE_DURATION, SimulatedArm};
pub use plan::ScanPlan;
pub use servo::{MAX_ANGLE, PAN_SERVO, SERVO_COUNT, ServoAngles, TILT_SERVO, jog, validate_angles};
