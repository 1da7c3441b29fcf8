use serde::{Deserialize, Serialize};

use crate::MissionMode;

/// Vehicle readings captured once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub altitude_cm: i32,
    pub battery_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MissionEvent {
    StatusMessage { text: String },
    TelemetryUpdated(TelemetrySnapshot),
    MissionStarted,
    MissionFinished,
    ConnectionStatus { connected: bool },
    ModeChanged { from: MissionMode, to: MissionMode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts_unix_ms: i64,
    #[serde(flatten)]
    pub event: MissionEvent,
}

impl EventRecord {
    pub fn now(event: MissionEvent) -> Self {
        Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_record_json_shape() {
        let rec = EventRecord {
            ts_unix_ms: 42,
            event: MissionEvent::StatusMessage { text: "Pad lost".into() },
        };
        let v: serde_json::Value = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["ts_unix_ms"], 42);
        assert_eq!(v["event"], "status_message");
        assert_eq!(v["text"], "Pad lost");
    }

    #[test]
    fn test_mode_change_serializes_snake_case() {
        let ev = MissionEvent::ModeChanged {
            from: MissionMode::PathFollowing,
            to: MissionMode::PadAlignment,
        };
        let s = serde_json::to_string(&ev).unwrap();
        assert!(s.contains("\"from\":\"path_following\""));
        assert!(s.contains("\"to\":\"pad_alignment\""));
    }

    #[test]
    fn test_record_timestamp_is_recent() {
        let rec = EventRecord::now(MissionEvent::MissionStarted);
        assert!(rec.ts_unix_ms > 1_600_000_000_000);
    }
}
