use padpilot_fc::ActuatorError;
use padpilot_vision::PerceptionError;

#[derive(Debug, thiserror::Error)]
pub enum MissionFault {
    #[error("actuator command failed: {0}")]
    ActuatorCommandFailed(ActuatorError),

    #[error("perception query failed: {0}")]
    PerceptionQueryFailed(#[from] PerceptionError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Designed outcome of the built-in search, not a malfunction.
    #[error("built-in pad search exhausted after {attempts} attempt(s)")]
    RecoveryExhausted { attempts: u32 },

    #[error("recovery already in progress")]
    RecoveryInProgress,
}

impl From<ActuatorError> for MissionFault {
    fn from(e: ActuatorError) -> Self {
        if e.is_connection_lost() {
            MissionFault::ConnectionLost(e.to_string())
        } else {
            MissionFault::ActuatorCommandFailed(e)
        }
    }
}

impl MissionFault {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MissionFault::ConnectionLost(_))
    }
}
