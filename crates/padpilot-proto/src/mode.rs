use serde::{Deserialize, Serialize};

/// The single active mode of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionMode {
    Idle,
    PathFollowing,
    PadAlignment,
    PadRecovery,
    BuiltInPadSearch,
    Landed,
    EmergencyLanded,
}

impl MissionMode {
    pub fn is_terminal(self) -> bool {
        matches!(self, MissionMode::Landed | MissionMode::EmergencyLanded)
    }

    /// Recovery and the built-in search are sub-modes of pad alignment.
    pub fn is_recovering(self) -> bool {
        matches!(self, MissionMode::PadRecovery | MissionMode::BuiltInPadSearch)
    }
}

impl std::fmt::Display for MissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MissionMode::Idle => "IDLE",
            MissionMode::PathFollowing => "PATH",
            MissionMode::PadAlignment => "PAD_ALIGN",
            MissionMode::PadRecovery => "PAD_RECOVERY",
            MissionMode::BuiltInPadSearch => "PAD_SEARCH",
            MissionMode::Landed => "LANDED",
            MissionMode::EmergencyLanded => "EMERGENCY_LANDED",
        };
        f.write_str(s)
    }
}
