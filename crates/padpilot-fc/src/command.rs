use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDir {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDir {
    Clockwise,
    CounterClockwise,
}

impl RotateDir {
    pub fn opposite(self) -> Self {
        match self {
            RotateDir::Clockwise => RotateDir::CounterClockwise,
            RotateDir::CounterClockwise => RotateDir::Clockwise,
        }
    }
}

/// Which camera the vehicle uses for mission-pad recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadCamera {
    Downward,
    Forward,
    Both,
}

/// One discrete vehicle command in SDK terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enter SDK mode.
    Sdk,
    Takeoff,
    Land,
    Emergency,
    /// `rc 0 0 0 0`
    Hover,
    StreamOn,
    StreamOff,
    SetSpeed(u16),
    Move { dir: MoveDir, cm: u16 },
    Rotate { dir: RotateDir, deg: u16 },
    /// Fly to (x, y, z) cm in the frame of mission pad `pad_id`.
    GoToPad { x: i16, y: i16, z: i16, speed: u16, pad_id: u8 },
    PadDetectionOn,
    PadDetectionDirection(PadCamera),
}

/// Coarse command class, used for failure injection and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Sdk,
    Takeoff,
    Land,
    Emergency,
    Hover,
    Stream,
    SetSpeed,
    Move,
    Rotate,
    GoToPad,
    PadDetection,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Sdk => CommandKind::Sdk,
            Command::Takeoff => CommandKind::Takeoff,
            Command::Land => CommandKind::Land,
            Command::Emergency => CommandKind::Emergency,
            Command::Hover => CommandKind::Hover,
            Command::StreamOn | Command::StreamOff => CommandKind::Stream,
            Command::SetSpeed(_) => CommandKind::SetSpeed,
            Command::Move { .. } => CommandKind::Move,
            Command::Rotate { .. } => CommandKind::Rotate,
            Command::GoToPad { .. } => CommandKind::GoToPad,
            Command::PadDetectionOn | Command::PadDetectionDirection(_) => CommandKind::PadDetection,
        }
    }

    /// Text sent to the vehicle.
    pub fn wire(&self) -> String {
        match *self {
            Command::Sdk => "command".into(),
            Command::Takeoff => "takeoff".into(),
            Command::Land => "land".into(),
            Command::Emergency => "emergency".into(),
            Command::Hover => "rc 0 0 0 0".into(),
            Command::StreamOn => "streamon".into(),
            Command::StreamOff => "streamoff".into(),
            Command::SetSpeed(v) => format!("speed {}", v),
            Command::Move { dir, cm } => {
                let verb = match dir {
                    MoveDir::Up => "up",
                    MoveDir::Down => "down",
                    MoveDir::Left => "left",
                    MoveDir::Right => "right",
                    MoveDir::Forward => "forward",
                    MoveDir::Back => "back",
                };
                format!("{} {}", verb, cm)
            }
            Command::Rotate { dir, deg } => match dir {
                RotateDir::Clockwise => format!("cw {}", deg),
                RotateDir::CounterClockwise => format!("ccw {}", deg),
            },
            Command::GoToPad { x, y, z, speed, pad_id } => {
                format!("go {} {} {} {} m{}", x, y, z, speed, pad_id)
            }
            Command::PadDetectionOn => "mon".into(),
            Command::PadDetectionDirection(cam) => {
                let d = match cam {
                    PadCamera::Downward => 0,
                    PadCamera::Forward => 1,
                    PadCamera::Both => 2,
                };
                format!("mdirection {}", d)
            }
        }
    }

    /// `rc` setpoints are fire-and-forget; everything else is answered with ok/error.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Command::Hover)
    }

    /// Commands whose acknowledgement only arrives after the maneuver completes.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Command::Takeoff | Command::Land | Command::GoToPad { .. })
    }

    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Command::Takeoff
                | Command::Land
                | Command::Move { .. }
                | Command::Rotate { .. }
                | Command::GoToPad { .. }
        )
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire())
    }
}
