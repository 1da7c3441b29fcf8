use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use padpilot_fc::autodetect::{autodetect_sdk, default_candidate_addrs};
use padpilot_fc::sim::{SimConfig, SimVehicle};
use padpilot_fc::tello::TelloLink;
use padpilot_fc::{Actuator, TelloConfig};
use padpilot_mission::{doctor as mission_doctor, EventPublisher, Mission, MissionConfig, MissionRunner, RunOutcome};
use padpilot_proto::EventRecord;
use padpilot_vision::{
    CameraConfig, CameraFrames, FrameSource, Perception, PerceptionConfig, ProcessPerception, ScriptConfig,
    ScriptedPerception, StaticFrame,
};

#[derive(Debug, Parser)]
#[command(name = "padpilot", version, about = "padpilot - vision-guided path following and pad landing")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration without touching the vehicle.
    Doctor,
    /// Connect, take off and fly the mission. Ctrl-C triggers an emergency landing.
    Run,
    /// Fly the mission against the simulated vehicle and scripted perception.
    Sim,
    Fc {
        #[command(subcommand)]
        cmd: FcCmd,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Send the SDK handshake to candidate addresses and report who answers.
    Probe,
    /// Connect and print battery, height, mission pad and link status.
    Status,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    mission: MissionConfig,
    #[serde(default)]
    vehicle: VehicleCfg,
    camera: Option<CameraConfig>,
    perception: Option<PerceptionConfig>,
    #[serde(default)]
    events: EventsCfg,
}

#[derive(Debug, serde::Deserialize)]
struct VehicleCfg {
    /// "tello" | "sim"
    #[serde(default = "default_vehicle_kind")]
    kind: String,
    #[serde(flatten)]
    tello: TelloConfig,
    #[serde(default)]
    sim: SimCfg,
}

impl Default for VehicleCfg {
    fn default() -> Self {
        Self { kind: default_vehicle_kind(), tello: TelloConfig::default(), sim: SimCfg::default() }
    }
}

fn default_vehicle_kind() -> String {
    "tello".into()
}

#[derive(Debug, Default, serde::Deserialize)]
struct SimCfg {
    #[serde(flatten)]
    vehicle: SimConfig,
    #[serde(default)]
    perception: ScriptConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct EventsCfg {
    /// Append every event as one JSON line.
    jsonl_path: Option<String>,
    /// Broadcast buffer per observer (default 256).
    capacity: Option<usize>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Sim => sim(&cfg).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    mission_doctor::check_mission(&cfg.mission)?;

    match cfg.vehicle.kind.as_str() {
        "tello" => {
            let addr = cfg.vehicle.tello.address();
            anyhow::ensure!(addr.contains(':'), "vehicle.address must be host:port, got {:?}", addr);
            let cam = cfg.camera.as_ref().context("[camera] is required for vehicle.kind = \"tello\"")?;
            anyhow::ensure!(cam.width > 0 && cam.height > 0, "camera size must be non-zero");
            anyhow::ensure!(cam.fps >= 1 && cam.fps <= 60, "camera.fps should be 1..60");
            let p = cfg.perception.as_ref().context("[perception] is required for vehicle.kind = \"tello\"")?;
            anyhow::ensure!(!p.detector_cmd.is_empty(), "perception.detector_cmd is empty");
            anyhow::ensure!(!p.segmenter_cmd.is_empty(), "perception.segmenter_cmd is empty");
            anyhow::ensure!(
                p.conf_threshold > 0.0 && p.conf_threshold <= 1.0,
                "perception.conf_threshold must be in (0, 1]"
            );
            if p.query_timeout_ms >= cfg.mission.tick_interval_ms {
                warn!(
                    "perception.query_timeout_ms ({}) >= mission.tick_interval_ms ({}); slow queries will be cut off",
                    p.query_timeout_ms, cfg.mission.tick_interval_ms
                );
            }
        }
        "sim" => {
            anyhow::ensure!(
                cfg.vehicle.sim.vehicle.takeoff_height_cm.unwrap_or(80) >= cfg.mission.takeoff_descend_cm as i32 + 20,
                "vehicle.sim.takeoff_height_cm too low for mission.takeoff_descend_cm"
            );
        }
        other => anyhow::bail!("unknown vehicle.kind: {}", other),
    }

    if let Some(path) = &cfg.events.jsonl_path {
        let parent = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = parent {
            anyhow::ensure!(dir.is_dir(), "events.jsonl_path directory {} does not exist", dir.display());
        }
    }

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    anyhow::ensure!(cfg.vehicle.kind == "tello", "`run` flies a real vehicle; use `sim` for vehicle.kind = {:?}", cfg.vehicle.kind);
    info!("run: starting");

    let camera = cfg.camera.clone().context("no [camera] config section")?;
    let perception = cfg.perception.clone().context("no [perception] config section")?;

    let frames = CameraFrames::spawn(camera).context("start camera")?;
    let perception = ProcessPerception::new(perception).context("perception config")?;
    let link = TelloLink::new(cfg.vehicle.tello.clone());

    let events = EventPublisher::new(cfg.events.capacity.unwrap_or(256));
    let sink = spawn_event_sink(events.subscribe(), cfg.events.jsonl_path.clone()).await?;
    let mission = Mission::new(cfg.mission.clone(), link, perception, frames, events);

    let outcome = fly(mission).await;
    let _ = sink.await;
    info!("run: finished with {:?}", outcome?);
    Ok(())
}

async fn sim(cfg: &Config) -> Result<()> {
    info!("sim: starting");
    let vehicle = SimVehicle::new(cfg.vehicle.sim.vehicle.clone());
    let log = vehicle.clone();
    let perception = ScriptedPerception::from_config(&cfg.vehicle.sim.perception);
    let frames = StaticFrame::blank(960, 720);

    let events = EventPublisher::new(cfg.events.capacity.unwrap_or(256));
    let sink = spawn_event_sink(events.subscribe(), cfg.events.jsonl_path.clone()).await?;
    let mission = Mission::new(cfg.mission.clone().without_settle(), vehicle, perception, frames, events);

    let outcome = fly(mission).await;
    let _ = sink.await;
    let outcome = outcome?;

    println!("outcome: {:?}", outcome);
    for (i, cmd) in log.commands().iter().enumerate() {
        println!("{:>3} {}", i + 1, cmd);
    }
    Ok(())
}

/// Connect, take off and tick until the mission ends or Ctrl-C cancels it.
async fn fly<A, P, F>(mut mission: Mission<A, P, F>) -> Result<RunOutcome>
where
    A: Actuator,
    P: Perception,
    F: FrameSource,
{
    let token = mission.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c: emergency landing");
            token.cancel();
        }
    });

    let result = async {
        mission.connect().await.context("connect vehicle")?;
        mission.start().await.context("start mission")?;
        let runner = MissionRunner::new(mission.config().tick_interval());
        Ok::<_, anyhow::Error>(runner.run(&mut mission).await)
    }
    .await;

    ctrl_c.abort();
    if let Err(e) = mission.vehicle_mut().disconnect().await {
        warn!("disconnect failed: {}", e);
    }
    result
}

/// Log lag, and append each record to `jsonl_path` when set. Ends when the publisher is gone.
async fn spawn_event_sink(
    mut rx: broadcast::Receiver<EventRecord>,
    jsonl_path: Option<String>,
) -> Result<JoinHandle<()>> {
    let mut file = match jsonl_path {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("open events file {}", path))?,
        ),
        None => None,
    };

    Ok(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(rec) => {
                    let Some(f) = file.as_mut() else { continue };
                    match serde_json::to_string(&rec) {
                        Ok(mut line) => {
                            line.push('\n');
                            if let Err(e) = f.write_all(line.as_bytes()).await {
                                warn!("events: write failed, disabling file sink: {}", e);
                                file = None;
                            }
                        }
                        Err(e) => warn!("events: serialize failed: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("events: observer lagged, {} event(s) lost", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        if let Some(mut f) = file {
            let _ = f.flush().await;
        }
    }))
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    let tello = &cfg.vehicle.tello;
    match cmd {
        FcCmd::Probe => {
            let candidates = tello.candidate_addrs.clone().unwrap_or_else(default_candidate_addrs);
            let res = autodetect_sdk(candidates, tello.probe_timeout()).await?;
            match &res.chosen {
                Some(addr) => println!("CHOSEN: {}", addr),
                None => println!("CHOSEN: none"),
            }
            for p in res.probes {
                println!("probe addr={} ok={} {}ms note={}", p.addr, p.answered, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status => {
            let mut link = TelloLink::new(tello.clone());
            link.connect().await.context("connect vehicle")?;
            // the first state packet follows the handshake within ~100 ms
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;

            match link.battery_percent() {
                Ok(b) => println!("battery={}%", b),
                Err(e) => println!("battery=? ({})", e),
            }
            match link.altitude_cm() {
                Ok(h) => println!("height={}cm", h),
                Err(e) => println!("height=? ({})", e),
            }
            match link.mission_pad_id() {
                Ok(id) => println!("mission_pad={:?}", id),
                Err(e) => println!("mission_pad=? ({})", e),
            }
            let st = link.status().lock().unwrap_or_else(|e| e.into_inner()).clone();
            println!("connected={}", st.connected);
            println!("address={:?}", st.address);
            println!("last_state_age={:?}", st.state_age());
            println!("last_response={:?}", st.last_response);

            link.disconnect().await?;
            Ok(())
        }
    }
}
