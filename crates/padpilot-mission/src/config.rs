use std::time::Duration;

use serde::Deserialize;

/// Mission tunables, read from `[mission]`. Fixed for the lifetime of a mission.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub target_pad_id: u8,
    pub alignment_offset_threshold_px: i32,
    pub path_offset_threshold_px: i32,
    pub target_pad_approach_height_cm: i32,
    pub pad_search_altitude_cm: i32,
    pub max_built_in_search_attempts: u32,
    pub built_in_search_rotation_deg: u16,
    pub tick_interval_ms: u64,

    pub pad_approach_ascend_cm: u16,
    pub pad_align_rotation_deg: u16,
    pub pad_forward_step_cm: u16,
    pub pad_lost_forward_cm: u16,
    pub path_side_step_cm: u16,
    pub path_forward_step_cm: u16,
    pub no_path_first_rotation_deg: u16,
    pub no_path_second_rotation_deg: u16,
    pub pad_hover_offset_cm: i16,
    pub pad_approach_speed_cm_s: u16,
    pub takeoff_descend_cm: u16,
    pub flight_speed_cm_s: u16,

    pub settle: SettleDelays,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            target_pad_id: 5,
            alignment_offset_threshold_px: 80,
            path_offset_threshold_px: 50,
            target_pad_approach_height_cm: 25,
            pad_search_altitude_cm: 80,
            max_built_in_search_attempts: 20,
            built_in_search_rotation_deg: 30,
            tick_interval_ms: 700,
            pad_approach_ascend_cm: 40,
            pad_align_rotation_deg: 5,
            pad_forward_step_cm: 20,
            pad_lost_forward_cm: 40,
            path_side_step_cm: 20,
            path_forward_step_cm: 40,
            no_path_first_rotation_deg: 90,
            no_path_second_rotation_deg: 180,
            pad_hover_offset_cm: 50,
            pad_approach_speed_cm_s: 15,
            takeoff_descend_cm: 30,
            flight_speed_cm_s: 10,
            settle: SettleDelays::default(),
        }
    }
}

impl MissionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Same tunables, no settle delays. Used by the simulator and tests.
    pub fn without_settle(mut self) -> Self {
        self.settle = SettleDelays::none();
        self
    }
}

/// Time the vehicle is given to come to rest after a command, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettleDelays {
    pub takeoff: u64,
    pub post_takeoff_descend: u64,
    pub pad_ascend: u64,
    pub pad_descend: u64,
    pub pad_forward: u64,
    pub recovery_ascend: u64,
    pub search_rotation: u64,
    pub emergency_stop: u64,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            takeoff: 3000,
            post_takeoff_descend: 3000,
            pad_ascend: 1000,
            pad_descend: 2000,
            pad_forward: 2000,
            recovery_ascend: 2000,
            search_rotation: 2000,
            emergency_stop: 100,
        }
    }
}

impl SettleDelays {
    pub fn none() -> Self {
        Self {
            takeoff: 0,
            post_takeoff_descend: 0,
            pad_ascend: 0,
            pad_descend: 0,
            pad_forward: 0,
            recovery_ascend: 0,
            search_rotation: 0,
            emergency_stop: 0,
        }
    }
}

pub(crate) fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}
