use std::time::Duration;

use padpilot_fc::{Actuator, ActuatorError, Command, MoveDir, RotateDir};
use padpilot_proto::{MissionMode, TelemetrySnapshot};
use padpilot_vision::{Frame, FrameSource, PadBox, PathMask, Perception};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ms, MissionConfig};
use crate::error::MissionFault;
use crate::publisher::EventPublisher;
use crate::recovery::{LandingOutcome, Rung};
use crate::runner::CancelToken;
use crate::state::MissionState;

/// The mission state machine.
///
/// Owns the vehicle link, the perception oracle and the frame source. Each call to
/// [`Mission::on_tick`] reads one frame and the vehicle telemetry, decides, and issues
/// zero or more commands before returning them in issue order.
pub struct Mission<A, P, F> {
    pub(crate) cfg: MissionConfig,
    pub(crate) vehicle: A,
    perception: P,
    frames: F,
    pub(crate) events: EventPublisher,
    pub(crate) state: Option<MissionState>,
    pub(crate) cancel: CancelToken,
    pub(crate) recovering: bool,
    issued: Vec<Command>,
}

impl<A, P, F> Mission<A, P, F>
where
    A: Actuator,
    P: Perception,
    F: FrameSource,
{
    pub fn new(cfg: MissionConfig, vehicle: A, perception: P, frames: F, events: EventPublisher) -> Self {
        Self {
            cfg,
            vehicle,
            perception,
            frames,
            events,
            state: None,
            cancel: CancelToken::new(),
            recovering: false,
            issued: Vec::new(),
        }
    }

    pub fn config(&self) -> &MissionConfig {
        &self.cfg
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn vehicle(&self) -> &A {
        &self.vehicle
    }

    pub fn vehicle_mut(&mut self) -> &mut A {
        &mut self.vehicle
    }

    pub fn state(&self) -> Option<&MissionState> {
        self.state.as_ref()
    }

    pub fn mode(&self) -> MissionMode {
        self.state.as_ref().map(|s| s.mode).unwrap_or(MissionMode::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.running)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Connect the vehicle link and prepare it for flight.
    pub async fn connect(&mut self) -> Result<(), MissionFault> {
        if let Err(e) = self.vehicle.connect().await {
            self.events.connection(false);
            self.events.status(format!("Connection failed: {}", e));
            return Err(e.into());
        }
        self.events.connection(true);
        let _ = self.exec(Command::SetSpeed(self.cfg.flight_speed_cm_s), Duration::ZERO).await;
        let _ = self.exec(Command::StreamOn, Duration::ZERO).await;
        match self.vehicle.battery_percent() {
            Ok(b) => self.events.status(format!("Battery: {}%", b)),
            Err(e) => self.events.status(format!("Battery read failed: {}", e)),
        }
        self.issued.clear();
        Ok(())
    }

    /// Take off, settle and drop to working height. On success a fresh mission state exists.
    pub async fn start(&mut self) -> Result<(), MissionFault> {
        if self.is_running() {
            warn!("mission: start requested while already running");
            return Ok(());
        }
        self.issued.clear();
        if self.state.take().is_some() {
            // a previous mission ran on this object; its emergency stop no longer applies
            self.cancel.rearm();
        }
        self.recovering = false;
        self.events.begin_mission();
        let settle = self.cfg.settle;

        let _ = self.exec(Command::SetSpeed(self.cfg.flight_speed_cm_s), Duration::ZERO).await;
        if let Err(e) = self.exec(Command::Takeoff, ms(settle.takeoff)).await {
            self.events.status("Takeoff failed, mission not started");
            self.events.mission_finished();
            return Err(e.into());
        }
        let descend = Command::Move { dir: MoveDir::Down, cm: self.cfg.takeoff_descend_cm };
        let _ = self.exec(descend, ms(settle.post_takeoff_descend)).await;

        self.state = Some(MissionState::new());
        self.events.status("Mission started");
        self.events.mission_started();
        self.issued.clear();
        Ok(())
    }

    /// One scheduler tick. A no-op once the mission is no longer running.
    pub async fn on_tick(&mut self) -> Vec<Command> {
        if !self.is_running() {
            return Vec::new();
        }
        if self.cancel.is_cancelled() {
            return self.emergency_land().await;
        }
        self.issued.clear();

        let Some(frame) = self.frames.latest() else {
            debug!("mission: no frame yet, tick skipped");
            return Vec::new();
        };

        match self.read_telemetry() {
            Ok(snapshot) => self.events.telemetry(snapshot),
            Err(e) if e.is_connection_lost() => {
                self.events.status(format!("Telemetry unavailable: {}", e));
                self.terminal_fallback().await;
                return std::mem::take(&mut self.issued);
            }
            Err(e) => self.events.status(format!("Telemetry read failed: {}", e)),
        }

        if self.mode() != MissionMode::PadAlignment {
            let pads = self.detect_pads(&frame).await;
            if !pads.is_empty() {
                self.events.status("Pad detected, aligning");
                self.with_state(|st| st.enter_pad_alignment());
            } else if self.mode() != MissionMode::PathFollowing {
                self.with_state(|st| st.enter_path_following());
            }
        }

        match self.mode() {
            MissionMode::PadAlignment => self.align_to_pad(&frame).await,
            MissionMode::PathFollowing => self.follow_path(&frame).await,
            _ => {}
        }

        std::mem::take(&mut self.issued)
    }

    /// Operator landing. The mission is over whatever the vehicle answers.
    pub async fn land(&mut self) -> Vec<Command> {
        self.issued.clear();
        if let Err(e) = self.exec(Command::Land, Duration::ZERO).await {
            warn!("mission: operator land failed: {}", e);
        }
        self.finish(MissionMode::Landed);
        std::mem::take(&mut self.issued)
    }

    /// Stop, then cut the motors; plain land when the vehicle refuses the emergency stop.
    pub async fn emergency_land(&mut self) -> Vec<Command> {
        self.issued.clear();
        self.emergency_sequence().await;
        std::mem::take(&mut self.issued)
    }

    async fn emergency_sequence(&mut self) {
        self.cancel.cancel();
        // a recovery interrupted mid-await never reached its own reset
        self.recovering = false;
        self.events.status("Emergency landing");

        let _ = self.exec(Command::Hover, Duration::ZERO).await;
        let pause = ms(self.cfg.settle.emergency_stop);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        if self.exec(Command::Emergency, Duration::ZERO).await.is_err() {
            self.events.status("Emergency stop refused, landing instead");
            let _ = self.exec(Command::Land, Duration::ZERO).await;
        }
        self.finish(MissionMode::EmergencyLanded);
    }

    fn read_telemetry(&self) -> Result<TelemetrySnapshot, ActuatorError> {
        Ok(TelemetrySnapshot {
            altitude_cm: self.vehicle.altitude_cm()?,
            battery_percent: self.vehicle.battery_percent()?,
        })
    }

    async fn align_to_pad(&mut self, frame: &Frame) {
        if !self.state.as_ref().is_some_and(|s| s.pad_height_adjusted) {
            self.adjust_pad_height().await;
            // best-effort: a failed correction is not retried within the episode
            self.with_state(|st| {
                st.pad_height_adjusted = true;
                None
            });
            if !self.is_running() {
                return;
            }
        }

        let frame = self.frames.latest().unwrap_or_else(|| frame.clone());
        let pads = self.detect_pads(&frame).await;
        let settle = self.cfg.settle;

        match pads.first() {
            Some(pad) => {
                let offset = pad.center_x() - frame.center_x();
                if offset.abs() > self.cfg.alignment_offset_threshold_px {
                    let dir = if offset < 0 { RotateDir::CounterClockwise } else { RotateDir::Clockwise };
                    debug!("mission: pad offset {}px, rotating {:?}", offset, dir);
                    let cmd = Command::Rotate { dir, deg: self.cfg.pad_align_rotation_deg };
                    let _ = self.exec(cmd, Duration::ZERO).await;
                } else {
                    debug!("mission: pad offset {}px, advancing", offset);
                    let cmd = Command::Move { dir: MoveDir::Forward, cm: self.cfg.pad_forward_step_cm };
                    let _ = self.exec(cmd, ms(settle.pad_forward)).await;
                }
            }
            None => {
                self.events.status("Pad lost, moving forward before recovery");
                let cmd = Command::Move { dir: MoveDir::Forward, cm: self.cfg.pad_lost_forward_cm };
                let _ = self.exec(cmd, ms(settle.pad_forward)).await;
                self.hand_over_to_recovery().await;
            }
        }
    }

    async fn adjust_pad_height(&mut self) {
        let settle = self.cfg.settle;
        let up = Command::Move { dir: MoveDir::Up, cm: self.cfg.pad_approach_ascend_cm };
        let _ = self.exec(up, ms(settle.pad_ascend)).await;

        let altitude = match self.vehicle.altitude_cm() {
            Ok(a) => a,
            Err(e) if e.is_connection_lost() => {
                self.events.status(format!("Telemetry unavailable: {}", e));
                self.terminal_fallback().await;
                return;
            }
            Err(e) => {
                self.events.status(format!("Height correction skipped: {}", e));
                return;
            }
        };
        let adjustment = altitude - self.cfg.target_pad_approach_height_cm;
        if adjustment > 0 {
            info!("mission: descending {}cm to pad approach height", adjustment);
            let cm = u16::try_from(adjustment).unwrap_or(u16::MAX);
            let _ = self.exec(Command::Move { dir: MoveDir::Down, cm }, ms(settle.pad_descend)).await;
        }
    }

    async fn follow_path(&mut self, frame: &Frame) {
        match self.segment_path(frame).await {
            Some(mask) => {
                self.with_state(|st| {
                    st.no_path_counter = 0;
                    None
                });
                let Some(cx) = mask.centroid_x() else {
                    self.events.status("No path centroid found");
                    return;
                };
                let center = mask.center_x();
                let t = self.cfg.path_offset_threshold_px;
                let cmd = if cx < center - t {
                    Command::Move { dir: MoveDir::Left, cm: self.cfg.path_side_step_cm }
                } else if cx > center + t {
                    Command::Move { dir: MoveDir::Right, cm: self.cfg.path_side_step_cm }
                } else {
                    Command::Move { dir: MoveDir::Forward, cm: self.cfg.path_forward_step_cm }
                };
                debug!("mission: path centroid {} (centre {}) -> {}", cx, center, cmd);
                let _ = self.exec(cmd, Duration::ZERO).await;
            }
            None => {
                let count = self.state.as_mut().map(|st| st.record_no_path()).unwrap_or(0);
                match count {
                    1 => {
                        self.events.status("No path, rotating to search");
                        let cmd = Command::Rotate {
                            dir: RotateDir::Clockwise,
                            deg: self.cfg.no_path_first_rotation_deg,
                        };
                        let _ = self.exec(cmd, Duration::ZERO).await;
                    }
                    2 => {
                        self.events.status("No path, rotating the other way");
                        let cmd = Command::Rotate {
                            dir: RotateDir::Clockwise.opposite(),
                            deg: self.cfg.no_path_second_rotation_deg,
                        };
                        let _ = self.exec(cmd, Duration::ZERO).await;
                    }
                    _ => {
                        self.events.status("Path lost, switching to pad recovery");
                        self.with_state(|st| st.enter_pad_alignment());
                        self.hand_over_to_recovery().await;
                    }
                }
            }
        }
    }

    /// Run recovery to its end. A refused or interrupted recovery still ends the mission.
    async fn hand_over_to_recovery(&mut self) {
        match self.recover().await {
            Ok(report) if report.outcome == LandingOutcome::Cancelled => {
                self.emergency_sequence().await;
            }
            Ok(_) => {}
            Err(e) => {
                self.events.status(format!("Recovery not started: {}", e));
                self.terminal_fallback().await;
            }
        }
    }

    async fn detect_pads(&mut self, frame: &Frame) -> Vec<PadBox> {
        let budget = self.cfg.tick_interval();
        match timeout(budget, self.perception.detect_pads(frame)).await {
            Ok(Ok(pads)) => pads,
            Ok(Err(e)) => {
                self.events.status(format!("Pad detection failed: {}", MissionFault::from(e)));
                Vec::new()
            }
            Err(_) => {
                self.events.status(format!("Pad detection timed out after {:?}", budget));
                Vec::new()
            }
        }
    }

    async fn segment_path(&mut self, frame: &Frame) -> Option<PathMask> {
        let budget = self.cfg.tick_interval();
        match timeout(budget, self.perception.segment_path(frame)).await {
            Ok(Ok(mask)) => mask,
            Ok(Err(e)) => {
                self.events.status(format!("Path segmentation failed: {}", MissionFault::from(e)));
                None
            }
            Err(_) => {
                self.events.status(format!("Path segmentation timed out after {:?}", budget));
                None
            }
        }
    }

    /// Issue one command and let the vehicle settle. Failures are published and returned,
    /// never raised past the tick.
    pub(crate) async fn exec(&mut self, cmd: Command, settle: Duration) -> Result<(), ActuatorError> {
        self.issued.push(cmd);
        match perform(&mut self.vehicle, cmd).await {
            Ok(()) => {
                if !settle.is_zero() {
                    tokio::time::sleep(settle).await;
                }
                Ok(())
            }
            Err(e) => {
                self.events.status(format!("Command `{}` failed: {}", cmd, e));
                Err(e)
            }
        }
    }

    pub(crate) fn with_state(&mut self, f: impl FnOnce(&mut MissionState) -> Option<(MissionMode, MissionMode)>) {
        if let Some((from, to)) = self.state.as_mut().and_then(f) {
            self.events.mode_changed(from, to);
        }
    }

    pub(crate) fn set_mode(&mut self, to: MissionMode) {
        self.with_state(|st| st.transition(to));
    }

    /// Enter a terminal mode and announce the end of the mission (once).
    pub(crate) fn finish(&mut self, terminal: MissionMode) {
        self.with_state(|st| st.finish(terminal));
        self.events.mission_finished();
    }

    /// Plain land as the last resort, then end the mission.
    pub(crate) async fn terminal_fallback(&mut self) {
        let outcome = self.run_ladder(&[Rung::FallbackLand]).await;
        info!("mission: terminal fallback -> {:?}", outcome);
        self.finish(MissionMode::Landed);
    }
}

/// Map a command onto the vehicle's named operation for it.
async fn perform<A: Actuator>(vehicle: &mut A, cmd: Command) -> Result<(), ActuatorError> {
    match cmd {
        Command::Takeoff => vehicle.takeoff().await,
        Command::Land => vehicle.land().await,
        Command::Emergency => vehicle.emergency_stop().await,
        Command::Hover => vehicle.hover().await,
        Command::StreamOn => vehicle.stream_on().await,
        Command::SetSpeed(cm_s) => vehicle.set_speed(cm_s).await,
        Command::Move { dir, cm } => vehicle.move_by(dir, cm).await,
        Command::Rotate { dir, deg } => vehicle.rotate_by(deg, dir).await,
        Command::GoToPad { x, y, z, speed, pad_id } => vehicle.go_to_relative(x, y, z, speed, pad_id).await,
        Command::Sdk | Command::StreamOff | Command::PadDetectionOn | Command::PadDetectionDirection(_) => {
            vehicle.send(&cmd).await
        }
    }
}
