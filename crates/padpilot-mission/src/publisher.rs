use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use padpilot_proto::{EventRecord, MissionEvent, MissionMode, TelemetrySnapshot};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fan-out of mission events. Observers that fall behind lose the oldest events;
/// publishing never waits on them.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<EventRecord>,
    finished: Arc<AtomicBool>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, finished: Arc::new(AtomicBool::new(false)) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MissionEvent) {
        match &event {
            MissionEvent::TelemetryUpdated(t) => {
                debug!("telemetry: alt={}cm bat={}%", t.altitude_cm, t.battery_percent)
            }
            MissionEvent::StatusMessage { text } => info!("status: {}", text),
            other => info!("event: {:?}", other),
        }
        // no subscribers is fine
        let _ = self.tx.send(EventRecord::now(event));
    }

    pub fn status(&self, text: impl Into<String>) {
        self.publish(MissionEvent::StatusMessage { text: text.into() });
    }

    pub fn telemetry(&self, snapshot: TelemetrySnapshot) {
        self.publish(MissionEvent::TelemetryUpdated(snapshot));
    }

    pub fn mode_changed(&self, from: MissionMode, to: MissionMode) {
        self.publish(MissionEvent::ModeChanged { from, to });
    }

    pub fn connection(&self, connected: bool) {
        self.publish(MissionEvent::ConnectionStatus { connected });
    }

    /// Re-arms the `MissionFinished` guard for a new mission.
    pub fn begin_mission(&self) {
        self.finished.store(false, Ordering::SeqCst);
    }

    pub fn mission_started(&self) {
        self.publish(MissionEvent::MissionStarted);
    }

    /// Publishes `MissionFinished` unless it was already sent for this mission.
    pub fn mission_finished(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.publish(MissionEvent::MissionFinished);
        true
    }
}
