use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::safety::CommandLimits;
use crate::{Actuator, ActuatorError, Command, CommandKind, MoveDir, RotateDir};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimConfig {
    /// Height right after takeoff (default 80).
    pub takeoff_height_cm: Option<i32>,
    pub battery_start: Option<u8>,
    /// Commands per 1% of battery (default 10).
    pub drain_every: Option<u32>,
    /// Successive mission-pad readings once detection is on; -1 = nothing under the camera.
    #[serde(default)]
    pub pad_ids: Vec<i32>,
    /// Command kinds that always fail.
    #[serde(default)]
    pub fail: Vec<CommandKind>,
    pub enforce_limits: Option<bool>,
}

#[derive(Debug)]
struct SimInner {
    connected: bool,
    link_lost: bool,
    airborne: bool,
    altitude_cm: i32,
    heading_deg: i32,
    battery: u8,
    issued: u32,
    drain_every: u32,
    takeoff_height_cm: i32,
    pad_detection: bool,
    pad_script: VecDeque<Option<u8>>,
    fail_always: Vec<CommandKind>,
    fail_next: HashMap<CommandKind, u32>,
    drop_link_after: Option<CommandKind>,
    limits: Option<CommandLimits>,
    log: Vec<Command>,
}

/// In-memory vehicle. Clones share state, so a test can keep a handle for
/// failure injection and for reading back the command log.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    inner: Arc<Mutex<SimInner>>,
}

impl Default for SimVehicle {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimVehicle {
    pub fn new(cfg: SimConfig) -> Self {
        let pad_script = cfg
            .pad_ids
            .iter()
            .map(|id| u8::try_from(*id).ok().filter(|id| *id > 0))
            .collect();
        let inner = SimInner {
            connected: false,
            link_lost: false,
            airborne: false,
            altitude_cm: 0,
            heading_deg: 0,
            battery: cfg.battery_start.unwrap_or(100).min(100),
            issued: 0,
            drain_every: cfg.drain_every.unwrap_or(10).max(1),
            takeoff_height_cm: cfg.takeoff_height_cm.unwrap_or(80),
            pad_detection: false,
            pad_script,
            fail_always: cfg.fail,
            fail_next: HashMap::new(),
            drop_link_after: None,
            limits: cfg.enforce_limits.unwrap_or(true).then(CommandLimits::default),
            log: Vec::new(),
        };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every command that reached the vehicle, failed ones included.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    pub fn fail_next(&self, kind: CommandKind, times: u32) {
        *self.lock().fail_next.entry(kind).or_insert(0) += times;
    }

    pub fn fail_always(&self, kind: CommandKind) {
        self.lock().fail_always.push(kind);
    }

    pub fn push_pad_reading(&self, id: Option<u8>) {
        self.lock().pad_script.push_back(id);
    }

    pub fn set_altitude(&self, cm: i32) {
        self.lock().altitude_cm = cm.max(0);
    }

    pub fn lose_link(&self) {
        self.lock().link_lost = true;
    }

    /// Drop the link right after the next command of `kind` has been acknowledged.
    pub fn lose_link_after(&self, kind: CommandKind) {
        self.lock().drop_link_after = Some(kind);
    }

    pub fn is_airborne(&self) -> bool {
        self.lock().airborne
    }

    pub fn heading_deg(&self) -> i32 {
        self.lock().heading_deg
    }

    fn check_link(inner: &SimInner) -> Result<(), ActuatorError> {
        if inner.link_lost {
            return Err(ActuatorError::ConnectionLost("simulated link loss".into()));
        }
        if !inner.connected {
            return Err(ActuatorError::NotConnected);
        }
        Ok(())
    }
}

impl SimInner {
    fn injected_failure(&mut self, kind: CommandKind) -> bool {
        if self.fail_always.contains(&kind) {
            return true;
        }
        match self.fail_next.get_mut(&kind) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn apply(&mut self, cmd: &Command) -> Result<(), String> {
        let needs_air = matches!(cmd, Command::Move { .. } | Command::Rotate { .. } | Command::GoToPad { .. });
        if needs_air && !self.airborne {
            return Err("error Not flying".into());
        }

        match *cmd {
            Command::Takeoff => {
                self.airborne = true;
                self.altitude_cm = self.takeoff_height_cm;
            }
            Command::Land | Command::Emergency => {
                self.airborne = false;
                self.altitude_cm = 0;
                self.pad_detection = false;
            }
            Command::Move { dir: MoveDir::Up, cm } => self.altitude_cm += cm as i32,
            Command::Move { dir: MoveDir::Down, cm } => self.altitude_cm = (self.altitude_cm - cm as i32).max(0),
            Command::Move { .. } => {}
            Command::Rotate { dir, deg } => {
                let signed = match dir {
                    RotateDir::Clockwise => deg as i32,
                    RotateDir::CounterClockwise => -(deg as i32),
                };
                self.heading_deg = (self.heading_deg + signed).rem_euclid(360);
            }
            Command::GoToPad { z, .. } => self.altitude_cm = z as i32,
            Command::PadDetectionOn => self.pad_detection = true,
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for SimVehicle {
    async fn connect(&mut self) -> Result<(), ActuatorError> {
        let mut inner = self.lock();
        if inner.link_lost {
            return Err(ActuatorError::ConnectionLost("simulated link loss".into()));
        }
        inner.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ActuatorError> {
        self.lock().connected = false;
        Ok(())
    }

    async fn send(&mut self, cmd: &Command) -> Result<(), ActuatorError> {
        let mut inner = self.lock();
        Self::check_link(&inner)?;
        if let Some(limits) = &inner.limits {
            limits.check(cmd)?;
        }

        inner.log.push(*cmd);
        inner.issued += 1;
        if inner.issued % inner.drain_every == 0 {
            inner.battery = inner.battery.saturating_sub(1);
        }
        debug!("sim: {}", cmd);

        if inner.injected_failure(cmd.kind()) {
            return Err(ActuatorError::CommandFailed {
                command: cmd.wire(),
                reason: "injected failure".into(),
            });
        }
        let applied = inner
            .apply(cmd)
            .map_err(|reason| ActuatorError::CommandFailed { command: cmd.wire(), reason });
        if inner.drop_link_after == Some(cmd.kind()) {
            inner.drop_link_after = None;
            inner.link_lost = true;
        }
        applied
    }

    fn altitude_cm(&self) -> Result<i32, ActuatorError> {
        let inner = self.lock();
        Self::check_link(&inner)?;
        Ok(inner.altitude_cm)
    }

    fn battery_percent(&self) -> Result<u8, ActuatorError> {
        let inner = self.lock();
        Self::check_link(&inner)?;
        Ok(inner.battery)
    }

    fn mission_pad_id(&self) -> Result<Option<u8>, ActuatorError> {
        let mut inner = self.lock();
        Self::check_link(&inner)?;
        if !inner.pad_detection {
            return Ok(None);
        }
        Ok(inner.pad_script.pop_front().flatten())
    }
}
