use anyhow::Result;

use crate::config::MissionConfig;

/// Range checks on the mission tunables. Nothing here touches the vehicle.
pub fn check_mission(cfg: &MissionConfig) -> Result<()> {
    anyhow::ensure!((1..=8).contains(&cfg.target_pad_id), "mission.target_pad_id must be 1..8");
    anyhow::ensure!(cfg.alignment_offset_threshold_px > 0, "mission.alignment_offset_threshold_px must be > 0");
    anyhow::ensure!(cfg.path_offset_threshold_px > 0, "mission.path_offset_threshold_px must be > 0");
    anyhow::ensure!(
        cfg.target_pad_approach_height_cm > 0 && cfg.target_pad_approach_height_cm < cfg.pad_search_altitude_cm,
        "mission.target_pad_approach_height_cm must be between 0 and pad_search_altitude_cm"
    );
    anyhow::ensure!(
        (20..=500).contains(&cfg.pad_search_altitude_cm),
        "mission.pad_search_altitude_cm should be 20..500"
    );
    anyhow::ensure!(cfg.max_built_in_search_attempts >= 1, "mission.max_built_in_search_attempts must be >= 1");
    anyhow::ensure!(cfg.tick_interval_ms >= 100, "mission.tick_interval_ms too small (< 100)");

    for (name, deg) in [
        ("built_in_search_rotation_deg", cfg.built_in_search_rotation_deg),
        ("pad_align_rotation_deg", cfg.pad_align_rotation_deg),
        ("no_path_first_rotation_deg", cfg.no_path_first_rotation_deg),
        ("no_path_second_rotation_deg", cfg.no_path_second_rotation_deg),
    ] {
        anyhow::ensure!((1..=360).contains(&deg), "mission.{} must be 1..360", name);
    }
    for (name, cm) in [
        ("pad_approach_ascend_cm", cfg.pad_approach_ascend_cm),
        ("pad_forward_step_cm", cfg.pad_forward_step_cm),
        ("pad_lost_forward_cm", cfg.pad_lost_forward_cm),
        ("path_side_step_cm", cfg.path_side_step_cm),
        ("path_forward_step_cm", cfg.path_forward_step_cm),
        ("takeoff_descend_cm", cfg.takeoff_descend_cm),
    ] {
        anyhow::ensure!((20..=500).contains(&cm), "mission.{} must be 20..500", name);
    }
    anyhow::ensure!(
        (10..=100).contains(&cfg.pad_approach_speed_cm_s) && (10..=100).contains(&cfg.flight_speed_cm_s),
        "mission speeds must be 10..100 cm/s"
    );
    anyhow::ensure!(
        cfg.pad_hover_offset_cm.abs() > 20 && cfg.pad_hover_offset_cm.abs() <= 500,
        "mission.pad_hover_offset_cm must be 21..500"
    );
    Ok(())
}
