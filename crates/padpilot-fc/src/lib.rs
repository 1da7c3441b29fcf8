pub mod autodetect;
pub mod command;
pub mod safety;
pub mod sim;
pub mod state;
pub mod tello;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub use command::{Command, CommandKind, MoveDir, PadCamera, RotateDir};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelloConfig {
    /// SDK command endpoint of the vehicle. Default 192.168.10.1:8889.
    pub address: Option<String>,

    /// Local socket for commands/responses. Default 0.0.0.0:8889.
    pub bind: Option<String>,

    /// Local socket the vehicle pushes its state string to. Default 0.0.0.0:8890.
    pub state_bind: Option<String>,

    /// Per-attempt response timeout for ordinary commands (default 7000).
    pub response_timeout_ms: Option<u64>,

    /// Timeout for takeoff/land/go (default 20000).
    pub long_response_timeout_ms: Option<u64>,

    /// Attempts per command before giving up (default 3).
    pub retry_count: Option<u32>,

    /// Telemetry older than this is treated as a lost link (default 3000).
    pub state_timeout_ms: Option<u64>,

    /// Probe candidates for `fc probe`. Example: ["192.168.10.1:8889", "127.0.0.1:8889"]
    pub candidate_addrs: Option<Vec<String>>,

    /// Response wait per probe attempt (default 1500).
    pub probe_timeout_ms: Option<u64>,
}

impl TelloConfig {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or("192.168.10.1:8889")
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or("0.0.0.0:8889")
    }

    pub fn state_bind(&self) -> &str {
        self.state_bind.as_deref().unwrap_or("0.0.0.0:8890")
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms.unwrap_or(7000))
    }

    pub fn long_response_timeout(&self) -> Duration {
        Duration::from_millis(self.long_response_timeout_ms.unwrap_or(20_000))
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or(3).max(1)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms.unwrap_or(3000))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(1500))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("`{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("`{command}` got no response after {attempts} attempt(s)")]
    Timeout { command: String, attempts: u32 },

    #[error("`{command}` out of range: {reason}")]
    OutOfRange { command: String, reason: String },

    #[error("vehicle connection lost: {0}")]
    ConnectionLost(String),

    #[error("vehicle not connected")]
    NotConnected,

    #[error("vehicle link i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ActuatorError {
    /// The link itself is gone; retrying commands is pointless.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ActuatorError::ConnectionLost(_) | ActuatorError::NotConnected)
    }
}

/// Command and telemetry surface of the vehicle.
///
/// Motion commands resolve once the vehicle has acknowledged them. Telemetry reads return the
/// most recent value the link holds and never block.
#[async_trait]
pub trait Actuator: Send {
    async fn connect(&mut self) -> Result<(), ActuatorError>;

    async fn disconnect(&mut self) -> Result<(), ActuatorError>;

    async fn send(&mut self, cmd: &Command) -> Result<(), ActuatorError>;

    fn altitude_cm(&self) -> Result<i32, ActuatorError>;

    fn battery_percent(&self) -> Result<u8, ActuatorError>;

    /// Id of the mission pad under the downward camera, if any.
    fn mission_pad_id(&self) -> Result<Option<u8>, ActuatorError>;

    async fn takeoff(&mut self) -> Result<(), ActuatorError> {
        self.send(&Command::Takeoff).await
    }

    async fn land(&mut self) -> Result<(), ActuatorError> {
        self.send(&Command::Land).await
    }

    /// Cuts the motors.
    async fn emergency_stop(&mut self) -> Result<(), ActuatorError> {
        self.send(&Command::Emergency).await
    }

    /// Zero all velocity setpoints.
    async fn hover(&mut self) -> Result<(), ActuatorError> {
        self.send(&Command::Hover).await
    }

    async fn move_by(&mut self, dir: MoveDir, cm: u16) -> Result<(), ActuatorError> {
        self.send(&Command::Move { dir, cm }).await
    }

    async fn rotate_by(&mut self, deg: u16, dir: RotateDir) -> Result<(), ActuatorError> {
        self.send(&Command::Rotate { dir, deg }).await
    }

    async fn go_to_relative(
        &mut self,
        x: i16,
        y: i16,
        z: i16,
        speed: u16,
        pad_id: u8,
    ) -> Result<(), ActuatorError> {
        self.send(&Command::GoToPad { x, y, z, speed, pad_id }).await
    }

    async fn enable_mission_pad_detection(&mut self, camera: PadCamera) -> Result<(), ActuatorError> {
        self.send(&Command::PadDetectionOn).await?;
        self.send(&Command::PadDetectionDirection(camera)).await
    }

    async fn set_speed(&mut self, cm_s: u16) -> Result<(), ActuatorError> {
        self.send(&Command::SetSpeed(cm_s)).await
    }

    async fn stream_on(&mut self) -> Result<(), ActuatorError> {
        self.send(&Command::StreamOn).await
    }
}
