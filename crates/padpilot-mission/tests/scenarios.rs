use std::time::Duration;

use padpilot_fc::sim::{SimConfig, SimVehicle};
use padpilot_fc::{Command, MoveDir, PadCamera, RotateDir};
use padpilot_mission::{EventPublisher, Mission, MissionConfig, MissionRunner, RunOutcome, SettleDelays};
use padpilot_proto::{EventRecord, MissionEvent, MissionMode};
use padpilot_vision::{ScriptConfig, ScriptedPerception, StaticFrame};
use tokio::sync::broadcast;

type SimMission = Mission<SimVehicle, ScriptedPerception, StaticFrame>;

async fn airborne(sim_cfg: SimConfig, script: ScriptedPerception) -> (SimMission, SimVehicle, broadcast::Receiver<EventRecord>) {
    let sim = SimVehicle::new(sim_cfg);
    let events = EventPublisher::new(4096);
    let rx = events.subscribe();
    let mut mission = Mission::new(
        MissionConfig::default().without_settle(),
        sim.clone(),
        script,
        StaticFrame::blank(960, 720),
        events,
    );
    mission.connect().await.unwrap();
    mission.start().await.unwrap();
    sim.clear_commands();
    (mission, sim, rx)
}

fn drain(rx: &mut broadcast::Receiver<EventRecord>) -> Vec<MissionEvent> {
    let mut out = Vec::new();
    while let Ok(rec) = rx.try_recv() {
        out.push(rec.event);
    }
    out
}

fn rotate(dir: RotateDir, deg: u16) -> Command {
    Command::Rotate { dir, deg }
}

fn mv(dir: MoveDir, cm: u16) -> Command {
    Command::Move { dir, cm }
}

#[tokio::test]
async fn test_path_to_recovery_to_pad_landing() {
    let script = ScriptedPerception::new();
    let sim_cfg = SimConfig { pad_ids: vec![-1, -1, -1, -1, 5], ..Default::default() };
    let (mut m, _sim, mut rx) = airborne(sim_cfg, script).await;

    let first = m.on_tick().await;
    assert_eq!(m.mode(), MissionMode::PathFollowing);
    assert_eq!(first, vec![rotate(RotateDir::Clockwise, 90)]);

    let second = m.on_tick().await;
    assert_eq!(second, vec![rotate(RotateDir::CounterClockwise, 180)]);

    let third = m.on_tick().await;
    let mut expected = vec![
        mv(MoveDir::Up, 30),
        Command::PadDetectionOn,
        Command::PadDetectionDirection(PadCamera::Downward),
    ];
    expected.extend(std::iter::repeat(rotate(RotateDir::Clockwise, 30)).take(4));
    expected.push(Command::GoToPad { x: 0, y: 0, z: 50, speed: 15, pad_id: 5 });
    expected.push(Command::Land);
    assert_eq!(third, expected);

    assert_eq!(m.mode(), MissionMode::Landed);
    assert!(!m.is_running());
    assert!(m.on_tick().await.is_empty(), "no fourth action");

    let events = drain(&mut rx);
    let modes: Vec<MissionMode> = events
        .iter()
        .filter_map(|e| match e {
            MissionEvent::ModeChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        modes,
        vec![
            MissionMode::PathFollowing,
            MissionMode::PadAlignment,
            MissionMode::PadRecovery,
            MissionMode::BuiltInPadSearch,
            MissionMode::Landed,
        ]
    );
    assert_eq!(events.iter().filter(|e| **e == MissionEvent::MissionFinished).count(), 1);
    assert!(events.iter().any(|e| matches!(e, MissionEvent::TelemetryUpdated(_))));
}

#[tokio::test]
async fn test_pad_dead_band_boundaries() {
    let cases = [
        (400.0, mv(MoveDir::Forward, 20)),                  // -80
        (399.0, rotate(RotateDir::CounterClockwise, 5)),    // -81
        (560.0, mv(MoveDir::Forward, 20)),                  // +80
        (561.0, rotate(RotateDir::Clockwise, 5)),           // +81
    ];
    for (cx, want) in cases {
        let script = ScriptedPerception::new();
        let (mut m, _sim, _rx) = airborne(SimConfig::default(), script.clone()).await;
        script.push_pad_at(480.0);
        script.push_pad_at(480.0);
        m.on_tick().await; // enter alignment, height correction

        script.push_pad_at(cx);
        let cmds = m.on_tick().await;
        assert_eq!(cmds, vec![want], "pad centre {}", cx);
        assert_eq!(m.mode(), MissionMode::PadAlignment);
    }
}

#[tokio::test]
async fn test_path_dead_band_boundaries() {
    let cases = [
        (430, mv(MoveDir::Forward, 40)), // m - 50
        (429, mv(MoveDir::Left, 20)),    // m - 51
        (431, mv(MoveDir::Forward, 40)), // m - 49
        (530, mv(MoveDir::Forward, 40)), // m + 50
        (531, mv(MoveDir::Right, 20)),   // m + 51
    ];
    for (cx, want) in cases {
        let script = ScriptedPerception::new();
        let (mut m, _sim, _rx) = airborne(SimConfig::default(), script.clone()).await;
        script.push_path_at(cx);
        assert_eq!(m.on_tick().await, vec![want], "centroid {}", cx);
        assert_eq!(m.state().unwrap().no_path_counter, 0);
    }
}

#[tokio::test]
async fn test_mask_between_empty_ticks_restarts_escalation() {
    let script = ScriptedPerception::new();
    let (mut m, _sim, _rx) = airborne(SimConfig::default(), script.clone()).await;

    m.on_tick().await;
    m.on_tick().await;
    script.push_path_at(480);
    m.on_tick().await;
    assert_eq!(m.on_tick().await, vec![rotate(RotateDir::Clockwise, 90)]);
    assert!(m.is_running());
}

#[tokio::test]
async fn test_height_correction_runs_once_per_episode() {
    let script = ScriptedPerception::new();
    let (mut m, sim, _rx) = airborne(SimConfig::default(), script.clone()).await;

    script.push_pad_at(480.0);
    script.push_pad_at(480.0);
    m.on_tick().await;
    assert!(m.state().unwrap().pad_height_adjusted);

    for _ in 0..3 {
        script.push_pad_at(480.0);
        assert_eq!(m.on_tick().await, vec![mv(MoveDir::Forward, 20)]);
    }
    let ups = sim
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Move { dir: MoveDir::Up, .. }))
        .count();
    assert_eq!(ups, 1);
}

#[tokio::test]
async fn test_failed_height_correction_is_not_retried() {
    let script = ScriptedPerception::new();
    let (mut m, sim, _rx) = airborne(SimConfig::default(), script.clone()).await;
    sim.fail_always(padpilot_fc::CommandKind::Move);

    script.push_pad_at(480.0);
    script.push_pad_at(300.0);
    let first = m.on_tick().await;
    assert_eq!(first[0], mv(MoveDir::Up, 40));
    assert!(m.state().unwrap().pad_height_adjusted);

    script.push_pad_at(300.0);
    assert_eq!(m.on_tick().await, vec![rotate(RotateDir::CounterClockwise, 5)]);
}

#[tokio::test]
async fn test_pad_lost_moves_forward_then_recovers() {
    let script = ScriptedPerception::new();
    let sim_cfg = SimConfig { pad_ids: vec![5], ..Default::default() };
    let (mut m, _sim, _rx) = airborne(sim_cfg, script.clone()).await;

    script.push_pad_at(480.0);
    script.push_pad_at(480.0);
    m.on_tick().await;

    let cmds = m.on_tick().await;
    assert_eq!(cmds[0], mv(MoveDir::Forward, 40));
    assert_eq!(cmds.last(), Some(&Command::Land));
    assert!(cmds.contains(&Command::GoToPad { x: 0, y: 0, z: 50, speed: 15, pad_id: 5 }));
    assert_eq!(m.mode(), MissionMode::Landed);
}

#[tokio::test]
async fn test_failed_forward_still_triggers_recovery() {
    let script = ScriptedPerception::new();
    let (mut m, sim, _rx) = airborne(SimConfig::default(), script.clone()).await;

    script.push_pad_at(480.0);
    script.push_pad_at(480.0);
    m.on_tick().await;

    sim.fail_next(padpilot_fc::CommandKind::Move, 1);
    let cmds = m.on_tick().await;
    assert_eq!(cmds[0], mv(MoveDir::Forward, 40));
    assert_eq!(cmds.last(), Some(&Command::Land));
    assert!(!m.is_running());
}

#[tokio::test]
async fn test_finished_published_once_across_late_commands() {
    let script = ScriptedPerception::new();
    let (mut m, _sim, mut rx) = airborne(SimConfig::default(), script).await;

    for _ in 0..3 {
        m.on_tick().await;
    }
    m.land().await;
    m.emergency_land().await;

    let finished = drain(&mut rx)
        .into_iter()
        .filter(|e| *e == MissionEvent::MissionFinished)
        .count();
    assert_eq!(finished, 1);
}

#[tokio::test(start_paused = true)]
async fn test_runner_drives_mission_to_completion() {
    let script = ScriptedPerception::new();
    let sim_cfg = SimConfig { pad_ids: vec![5], ..Default::default() };
    let (mut m, sim, _rx) = airborne(sim_cfg, script).await;

    let outcome = MissionRunner::new(Duration::from_millis(700)).run(&mut m).await;
    assert_eq!(outcome, RunOutcome::Completed(MissionMode::Landed));
    assert!(!sim.is_airborne());
}

#[tokio::test(start_paused = true)]
async fn test_runner_cancellation_lands_immediately() {
    let script = ScriptedPerception::from_config(&ScriptConfig {
        idle_path_center: Some(480),
        ..Default::default()
    });
    let (mut m, sim, _rx) = airborne(SimConfig::default(), script).await;

    let token = m.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
    });

    let outcome = MissionRunner::new(Duration::from_millis(700)).run(&mut m).await;
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(m.mode(), MissionMode::EmergencyLanded);

    let cmds = sim.commands();
    let n = cmds.len();
    assert!(n >= 2);
    assert_eq!(&cmds[n - 2..], &[Command::Hover, Command::Emergency]);
    assert!(cmds[..n - 2].iter().all(|c| *c == mv(MoveDir::Forward, 40)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_search_then_restart() {
    let sim = SimVehicle::new(SimConfig::default());
    let cfg = MissionConfig {
        settle: SettleDelays { search_rotation: 2000, ..SettleDelays::none() },
        ..MissionConfig::default()
    };
    let mut m = Mission::new(
        cfg,
        sim.clone(),
        ScriptedPerception::new(),
        StaticFrame::blank(960, 720),
        EventPublisher::new(4096),
    );
    m.connect().await.unwrap();
    m.start().await.unwrap();
    sim.clear_commands();

    // ticks at 0, 700 and 1400 ms; the third enters the search and settles after its first turn
    let token = m.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2000)).await;
        token.cancel();
    });

    let runner = MissionRunner::new(Duration::from_millis(700));
    assert_eq!(runner.run(&mut m).await, RunOutcome::Cancelled);
    assert_eq!(m.mode(), MissionMode::EmergencyLanded);

    let cmds = sim.commands();
    let hover = cmds.iter().position(|c| *c == Command::Hover).unwrap();
    assert_eq!(&cmds[hover..], &[Command::Hover, Command::Emergency]);
    assert_eq!(cmds[hover - 1], rotate(RotateDir::Clockwise, 30));
    assert!(cmds.contains(&Command::PadDetectionOn));
    assert!(!cmds.contains(&Command::Land));

    sim.push_pad_reading(Some(5));
    m.start().await.unwrap();
    assert!(m.is_running());
    sim.clear_commands();

    assert_eq!(runner.run(&mut m).await, RunOutcome::Completed(MissionMode::Landed));
    let cmds = sim.commands();
    assert!(cmds.contains(&Command::GoToPad { x: 0, y: 0, z: 50, speed: 15, pad_id: 5 }));
    assert_eq!(cmds.last(), Some(&Command::Land));
    assert!(!sim.is_airborne());
}
