use crate::driver::ArmError;

pub const SERVO_COUNT: usize = 6;
pub const MAX_ANGLE: u16 = 180;

/// Base rotation.
pub const PAN_SERVO: usize = 0;
/// Shoulder joint used to tilt the camera.
pub const TILT_SERVO: usize = 1;

/// Absolute angle in degrees for each servo channel, servo 1 first.
pub type ServoAngles = [u16; SERVO_COUNT];

pub fn validate_angles(angles: &ServoAngles) -> Result<(), ArmError> {
    for (index, &angle) in angles.iter().enumerate() {
        if angle > MAX_ANGLE {
            return Err(ArmError::AngleOutOfRange {
                servo: index + 1,
                angle,
            });
        }
    }
    Ok(())
}

/// Relative pan/tilt move from `pose`, clamped to the servo range.
pub fn jog(pose: &ServoAngles, pan_delta: i32, tilt_delta: i32) -> ServoAngles {
    let mut next = *pose;
    next[PAN_SERVO] = offset(pose[PAN_SERVO], pan_delta);
    next[TILT_SERVO] = offset(pose[TILT_SERVO], tilt_delta);
    next
}

fn offset(angle: u16, delta: i32) -> u16 {
    (angle as i32 + delta).clamp(0, MAX_ANGLE as i32) as u16
}
