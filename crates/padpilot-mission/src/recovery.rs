use std::time::Duration;

use padpilot_fc::{Actuator, Command, MoveDir, PadCamera, RotateDir};
use padpilot_proto::MissionMode;
use padpilot_vision::{FrameSource, Perception};
use tracing::{debug, info, warn};

use crate::config::ms;
use crate::error::MissionFault;
use crate::machine::Mission;

/// One step of the landing fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    /// Relative go-to above the identified pad.
    ApproachPad,
    /// Land, only after a successful approach.
    LandOnPad,
    /// Plain land.
    RetryLand,
    /// Plain land with no positioning precondition; ends every ladder.
    FallbackLand,
}

pub const PAD_FOUND_LADDER: &[Rung] = &[Rung::ApproachPad, Rung::LandOnPad, Rung::RetryLand];
pub const FALLBACK_LADDER: &[Rung] = &[Rung::FallbackLand];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingOutcome {
    OnPad,
    PlainLand,
    /// Every rung ran and no land was acknowledged.
    Failed,
    /// Stopped before the next motion command; the emergency path lands.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub pad_found: bool,
    /// Pad-id reads made by the built-in search.
    pub attempts: u32,
    pub outcome: LandingOutcome,
}

struct SearchResult {
    found: bool,
    attempts: u32,
}

impl<A, P, F> Mission<A, P, F>
where
    A: Actuator,
    P: Perception,
    F: FrameSource,
{
    /// Ascend, run the vehicle's own pad search, then land through the fallback ladder.
    ///
    /// Always ends the mission unless cancelled. Refuses to start while another
    /// recovery is in progress.
    pub async fn recover(&mut self) -> Result<RecoveryReport, MissionFault> {
        if self.recovering {
            warn!("recovery: already in progress");
            return Err(MissionFault::RecoveryInProgress);
        }
        self.recovering = true;
        let report = self.run_recovery().await;
        self.recovering = false;
        info!(
            "recovery: pad_found={} attempts={} outcome={:?}",
            report.pad_found, report.attempts, report.outcome
        );
        Ok(report)
    }

    async fn run_recovery(&mut self) -> RecoveryReport {
        self.set_mode(MissionMode::PadRecovery);
        self.events.status("Starting pad recovery");

        let mut attempts = 0;
        let search = self.search_for_pad(&mut attempts).await;

        if self.cancel.is_cancelled() {
            return RecoveryReport { pad_found: false, attempts, outcome: LandingOutcome::Cancelled };
        }

        let (pad_found, ladder) = match search {
            Ok(SearchResult { found: true, .. }) => {
                self.events.status(format!("Pad {} found, approaching", self.cfg.target_pad_id));
                (true, PAD_FOUND_LADDER)
            }
            Ok(SearchResult { found: false, attempts }) => {
                self.events.status(MissionFault::RecoveryExhausted { attempts }.to_string());
                (false, FALLBACK_LADDER)
            }
            Err(fault) => {
                self.events.status(format!("Recovery failed: {}", fault));
                (false, FALLBACK_LADDER)
            }
        };

        let outcome = self.run_ladder(ladder).await;
        if outcome == LandingOutcome::Cancelled {
            return RecoveryReport { pad_found, attempts, outcome };
        }
        if outcome == LandingOutcome::Failed {
            self.events.status("All landing attempts failed");
        }
        self.finish(MissionMode::Landed);
        RecoveryReport { pad_found, attempts, outcome }
    }

    async fn search_for_pad(&mut self, attempts: &mut u32) -> Result<SearchResult, MissionFault> {
        let settle = self.cfg.settle;

        let altitude = self.vehicle.altitude_cm()?;
        let target_alt = self.cfg.pad_search_altitude_cm;
        if altitude < target_alt {
            if self.cancel.is_cancelled() {
                return Ok(SearchResult { found: false, attempts: *attempts });
            }
            let cm = u16::try_from(target_alt - altitude).unwrap_or(u16::MAX);
            info!("recovery: climbing {}cm to search altitude", cm);
            self.exec(Command::Move { dir: MoveDir::Up, cm }, ms(settle.recovery_ascend)).await?;
        }

        self.set_mode(MissionMode::BuiltInPadSearch);
        self.exec(Command::PadDetectionOn, Duration::ZERO).await?;
        self.exec(Command::PadDetectionDirection(PadCamera::Downward), Duration::ZERO).await?;

        let target = self.cfg.target_pad_id;
        while *attempts < self.cfg.max_built_in_search_attempts {
            if self.cancel.is_cancelled() {
                debug!("recovery: search cancelled");
                break;
            }
            *attempts += 1;
            match self.vehicle.mission_pad_id()? {
                Some(id) if id == target => {
                    info!("recovery: target pad {} found on attempt {}", id, attempts);
                    return Ok(SearchResult { found: true, attempts: *attempts });
                }
                Some(id) => debug!("recovery: pad {} is not the target", id),
                None => debug!("recovery: no pad on attempt {}", attempts),
            }
            let rotate = Command::Rotate { dir: RotateDir::Clockwise, deg: self.cfg.built_in_search_rotation_deg };
            if self.exec(rotate, ms(settle.search_rotation)).await.is_err() {
                warn!("recovery: rotation failed, ending search");
                break;
            }
        }
        Ok(SearchResult { found: false, attempts: *attempts })
    }

    /// Walk the ladder until a land is acknowledged.
    pub(crate) async fn run_ladder(&mut self, ladder: &[Rung]) -> LandingOutcome {
        let mut approached = false;
        for rung in ladder {
            if self.cancel.is_cancelled() {
                return LandingOutcome::Cancelled;
            }
            match rung {
                Rung::ApproachPad => {
                    let cmd = Command::GoToPad {
                        x: 0,
                        y: 0,
                        z: self.cfg.pad_hover_offset_cm,
                        speed: self.cfg.pad_approach_speed_cm_s,
                        pad_id: self.cfg.target_pad_id,
                    };
                    approached = self.exec(cmd, Duration::ZERO).await.is_ok();
                    if !approached {
                        self.events.status("Approach to pad failed, landing in place");
                    }
                }
                Rung::LandOnPad => {
                    if !approached {
                        continue;
                    }
                    if self.exec(Command::Land, Duration::ZERO).await.is_ok() {
                        self.events.status("Landed on pad");
                        return LandingOutcome::OnPad;
                    }
                    self.events.status("Land on pad failed, retrying");
                }
                Rung::RetryLand | Rung::FallbackLand => {
                    if self.exec(Command::Land, Duration::ZERO).await.is_ok() {
                        self.events.status("Landed");
                        return LandingOutcome::PlainLand;
                    }
                }
            }
        }
        LandingOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionConfig;
    use crate::publisher::EventPublisher;
    use padpilot_fc::sim::{SimConfig, SimVehicle};
    use padpilot_fc::CommandKind;
    use padpilot_vision::{ScriptedPerception, StaticFrame};

    async fn airborne(pad_ids: Vec<i32>) -> (Mission<SimVehicle, ScriptedPerception, StaticFrame>, SimVehicle) {
        let sim = SimVehicle::new(SimConfig { pad_ids, ..Default::default() });
        let mut m = Mission::new(
            MissionConfig::default().without_settle(),
            sim.clone(),
            ScriptedPerception::new(),
            StaticFrame::blank(960, 720),
            EventPublisher::default(),
        );
        m.connect().await.unwrap();
        m.start().await.unwrap();
        sim.clear_commands();
        (m, sim)
    }

    fn lands(cmds: &[Command]) -> usize {
        cmds.iter().filter(|c| **c == Command::Land).count()
    }

    #[tokio::test]
    async fn test_found_on_first_read_approaches_and_lands() {
        let (mut m, sim) = airborne(vec![5]).await;
        let report = m.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { pad_found: true, attempts: 1, outcome: LandingOutcome::OnPad });
        assert_eq!(
            sim.commands(),
            vec![
                Command::Move { dir: MoveDir::Up, cm: 30 },
                Command::PadDetectionOn,
                Command::PadDetectionDirection(PadCamera::Downward),
                Command::GoToPad { x: 0, y: 0, z: 50, speed: 15, pad_id: 5 },
                Command::Land,
            ]
        );
        assert_eq!(m.mode(), MissionMode::Landed);
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn test_no_climb_above_search_altitude() {
        let (mut m, sim) = airborne(vec![5]).await;
        sim.set_altitude(120);
        m.recover().await.unwrap();
        assert_eq!(sim.commands()[0], Command::PadDetectionOn);
    }

    #[tokio::test]
    async fn test_exhausted_search_falls_back_to_plain_land() {
        let (mut m, sim) = airborne(vec![]).await;
        let report = m.recover().await.unwrap();
        assert!(!report.pad_found);
        assert_eq!(report.attempts, 20);
        assert_eq!(report.outcome, LandingOutcome::PlainLand);
        let cmds = sim.commands();
        assert_eq!(cmds.iter().filter(|c| matches!(c, Command::Rotate { .. })).count(), 20);
        assert_eq!(lands(&cmds), 1);
        assert!(!cmds.iter().any(|c| matches!(c, Command::GoToPad { .. })));
    }

    #[tokio::test]
    async fn test_other_pad_ids_keep_searching() {
        let (mut m, sim) = airborne(vec![2, 3, 5]).await;
        let report = m.recover().await.unwrap();
        assert_eq!(report.attempts, 3);
        assert!(report.pad_found);
        let rotations = sim.commands().iter().filter(|c| matches!(c, Command::Rotate { .. })).count();
        assert_eq!(rotations, 2);
    }

    #[tokio::test]
    async fn test_goto_failure_lands_in_place_once() {
        let (mut m, sim) = airborne(vec![5]).await;
        sim.fail_next(CommandKind::GoToPad, 1);
        let report = m.recover().await.unwrap();
        assert_eq!(report.outcome, LandingOutcome::PlainLand);
        let cmds = sim.commands();
        assert_eq!(lands(&cmds), 1);
        assert_eq!(cmds.last(), Some(&Command::Land));
    }

    #[tokio::test]
    async fn test_land_failure_after_approach_retries_once() {
        let (mut m, sim) = airborne(vec![5]).await;
        sim.fail_next(CommandKind::Land, 1);
        let report = m.recover().await.unwrap();
        assert_eq!(report.outcome, LandingOutcome::PlainLand);
        assert_eq!(lands(&sim.commands()), 2);
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn test_unexpected_error_lands_and_finishes() {
        let (mut m, sim) = airborne(vec![5]).await;
        sim.fail_next(CommandKind::PadDetection, 1);
        let report = m.recover().await.unwrap();
        assert!(!report.pad_found);
        assert_eq!(report.outcome, LandingOutcome::PlainLand);
        assert_eq!(sim.commands().last(), Some(&Command::Land));
        assert_eq!(m.mode(), MissionMode::Landed);
    }

    #[tokio::test]
    async fn test_every_land_failing_still_ends_mission() {
        let (mut m, sim) = airborne(vec![5]).await;
        sim.fail_always(CommandKind::Land);
        let report = m.recover().await.unwrap();
        assert_eq!(report.outcome, LandingOutcome::Failed);
        assert_eq!(lands(&sim.commands()), 2);
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn test_rotation_failure_ends_search() {
        let (mut m, sim) = airborne(vec![-1, 5]).await;
        sim.fail_next(CommandKind::Rotate, 1);
        let report = m.recover().await.unwrap();
        assert!(!report.pad_found);
        assert_eq!(report.attempts, 1);
        assert_eq!(lands(&sim.commands()), 1);
    }

    #[tokio::test]
    async fn test_cancelled_recovery_issues_no_land() {
        let (mut m, sim) = airborne(vec![5]).await;
        m.cancel_token().cancel();
        let report = m.recover().await.unwrap();
        assert_eq!(report.outcome, LandingOutcome::Cancelled);
        assert_eq!(lands(&sim.commands()), 0);
        assert!(sim.commands().iter().all(|c| !c.is_motion()));
    }

    #[tokio::test]
    async fn test_not_reentrant() {
        let (mut m, _sim) = airborne(vec![5]).await;
        m.recovering = true;
        assert!(matches!(m.recover().await, Err(MissionFault::RecoveryInProgress)));
    }
}
