use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One decoded state datagram (`mid:5;x:0;...;h:40;bat:87;...`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelloState {
    /// Mission pad id, -1 when none is recognized.
    pub mid: i32,
    /// Position relative to the recognized pad, cm.
    pub pad_x: i32,
    pub pad_y: i32,
    pub pad_z: i32,
    pub yaw: i32,
    pub height_cm: i32,
    pub tof_cm: i32,
    pub battery: u8,
    pub temp_low_c: i32,
    pub temp_high_c: i32,
}

impl TelloState {
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: HashMap<&str, &str> = raw
            .trim()
            .split(';')
            .filter_map(|kv| kv.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let int = |k: &str| fields.get(k).and_then(|v| v.parse::<i32>().ok());

        // h and bat are what the mission reads; without them the packet is useless
        let height_cm = int("h")?;
        let battery = int("bat")?.clamp(0, 100) as u8;

        Some(Self {
            mid: int("mid").unwrap_or(-1),
            pad_x: int("x").unwrap_or(-100),
            pad_y: int("y").unwrap_or(-100),
            pad_z: int("z").unwrap_or(-100),
            yaw: int("yaw").unwrap_or(0),
            height_cm,
            tof_cm: int("tof").unwrap_or(0),
            battery,
            temp_low_c: int("templ").unwrap_or(0),
            temp_high_c: int("temph").unwrap_or(0),
        })
    }

    pub fn pad_id(&self) -> Option<u8> {
        u8::try_from(self.mid).ok().filter(|id| *id > 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub address: Option<String>,
    pub last_state_at: Option<Instant>,
    pub state: Option<TelloState>,
    pub last_response: Option<String>,
}

impl LinkStatus {
    pub fn state_age(&self) -> Option<Duration> {
        self.last_state_at.map(|t| t.elapsed())
    }

    pub fn record_state(&mut self, state: TelloState) {
        self.state = Some(state);
        self.last_state_at = Some(Instant::now());
    }
}
