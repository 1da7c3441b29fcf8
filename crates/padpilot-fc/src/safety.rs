use crate::{ActuatorError, Command};

/// SDK argument ranges. Anything outside them is refused locally instead of
/// round-tripping an `error` from the vehicle.
#[derive(Debug, Clone)]
pub struct CommandLimits {
    pub min_move_cm: u16,
    pub max_move_cm: u16,
    pub max_rotate_deg: u16,
    pub min_speed: u16,
    pub max_speed: u16,
    pub max_go_cm: i16,
    /// go x y z may not have all three axes inside +/- this value
    pub go_dead_zone_cm: i16,
    pub max_pad_id: u8,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            min_move_cm: 20,
            max_move_cm: 500,
            max_rotate_deg: 360,
            min_speed: 10,
            max_speed: 100,
            max_go_cm: 500,
            go_dead_zone_cm: 20,
            max_pad_id: 8,
        }
    }
}

impl CommandLimits {
    pub fn check(&self, cmd: &Command) -> Result<(), ActuatorError> {
        let reject = |reason: String| {
            Err(ActuatorError::OutOfRange { command: cmd.wire(), reason })
        };

        match *cmd {
            Command::Move { cm, .. } => {
                if cm < self.min_move_cm || cm > self.max_move_cm {
                    return reject(format!("distance must be {}..={} cm", self.min_move_cm, self.max_move_cm));
                }
            }
            Command::Rotate { deg, .. } => {
                if deg == 0 || deg > self.max_rotate_deg {
                    return reject(format!("angle must be 1..={} deg", self.max_rotate_deg));
                }
            }
            Command::SetSpeed(v) => {
                if v < self.min_speed || v > self.max_speed {
                    return reject(format!("speed must be {}..={} cm/s", self.min_speed, self.max_speed));
                }
            }
            Command::GoToPad { x, y, z, speed, pad_id } => {
                let m = self.max_go_cm;
                if [x, y, z].iter().any(|v| *v < -m || *v > m) {
                    return reject(format!("coordinates must be within +/-{} cm", m));
                }
                let dz = self.go_dead_zone_cm;
                if [x, y, z].iter().all(|v| *v >= -dz && *v <= dz) {
                    return reject(format!("at least one axis must exceed +/-{} cm", dz));
                }
                if speed < self.min_speed || speed > self.max_speed {
                    return reject(format!("speed must be {}..={} cm/s", self.min_speed, self.max_speed));
                }
                if pad_id == 0 || pad_id > self.max_pad_id {
                    return reject(format!("pad id must be 1..={}", self.max_pad_id));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
