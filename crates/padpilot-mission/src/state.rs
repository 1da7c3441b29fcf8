use padpilot_proto::MissionMode;

/// Per-mission control state. Created after a successful takeoff and mutated only by the
/// mission's own tick and recovery steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionState {
    pub mode: MissionMode,
    /// Consecutive ticks without a path mask.
    pub no_path_counter: u32,
    /// One-shot gate for the pad-approach height correction.
    pub pad_height_adjusted: bool,
    /// False once a terminal command has been issued.
    pub running: bool,
}

impl Default for MissionState {
    fn default() -> Self {
        Self::new()
    }
}

impl MissionState {
    pub fn new() -> Self {
        Self {
            mode: MissionMode::Idle,
            no_path_counter: 0,
            pad_height_adjusted: false,
            running: true,
        }
    }

    /// Switch mode; returns the (from, to) pair when the mode actually changed.
    pub fn transition(&mut self, to: MissionMode) -> Option<(MissionMode, MissionMode)> {
        if self.mode == to {
            return None;
        }
        let from = std::mem::replace(&mut self.mode, to);
        Some((from, to))
    }

    /// Start a fresh pad-alignment episode.
    pub fn enter_pad_alignment(&mut self) -> Option<(MissionMode, MissionMode)> {
        self.pad_height_adjusted = false;
        self.transition(MissionMode::PadAlignment)
    }

    pub fn enter_path_following(&mut self) -> Option<(MissionMode, MissionMode)> {
        self.no_path_counter = 0;
        self.transition(MissionMode::PathFollowing)
    }

    /// Count one more empty-mask tick; returns the new count.
    pub fn record_no_path(&mut self) -> u32 {
        self.no_path_counter += 1;
        self.no_path_counter
    }

    pub fn finish(&mut self, terminal: MissionMode) -> Option<(MissionMode, MissionMode)> {
        self.running = false;
        self.transition(terminal)
    }
}
