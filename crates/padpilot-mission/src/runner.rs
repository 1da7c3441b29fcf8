use std::sync::Arc;
use std::time::Duration;

use padpilot_fc::Actuator;
use padpilot_proto::MissionMode;
use padpilot_vision::{FrameSource, Perception};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::machine::Mission;

/// One-shot emergency-stop signal shared between the operator and the mission.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clear a previous cancellation. Clones keep observing the same flag.
    pub fn rearm(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so wait_for only returns once the flag is set
        let _ = rx.wait_for(|c| *c).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The mission reached a terminal mode on its own.
    Completed(MissionMode),
    /// Cancelled by the operator; the emergency landing ran.
    Cancelled,
}

/// Fixed-interval tick loop. Ticks never overlap: a slow tick (a recovery run, say)
/// delays the next one instead of queueing it.
pub struct MissionRunner {
    period: Duration,
}

impl MissionRunner {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub async fn run<A, P, F>(&self, mission: &mut Mission<A, P, F>) -> RunOutcome
    where
        A: Actuator,
        P: Perception,
        F: FrameSource,
    {
        let cancel = mission.cancel_token();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("runner: ticking every {:?}", self.period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("runner: cancelled between ticks");
                    mission.emergency_land().await;
                    return RunOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            if !mission.is_running() {
                info!("runner: mission ended in {}", mission.mode());
                return RunOutcome::Completed(mission.mode());
            }

            let issued = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                cmds = mission.on_tick() => Some(cmds),
            };

            match issued {
                Some(cmds) => debug!("runner: tick issued {:?}", cmds.iter().map(|c| c.wire()).collect::<Vec<_>>()),
                None => {
                    warn!("runner: cancelled mid-tick");
                    mission.emergency_land().await;
                    return RunOutcome::Cancelled;
                }
            }

            if !mission.is_running() {
                info!("runner: mission ended in {}", mission.mode());
                return RunOutcome::Completed(mission.mode());
            }
        }
    }
}
