//! Runtime configuration
//!
//! Everything tunable lives here. `CoreConfig::default()` carries the values
//! the client was calibrated against at 1067x600; a JSON file may override any
//! subset of fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::gait::GaitProfile;
use crate::planner::DiagonalRunVariant;
use crate::types::{BBox, Label};

/// Converts a seconds field to a `Duration`, treating negatives as zero.
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub capture: CaptureConfig,
    pub gait: GaitConfig,
    pub motion: MotionConfig,
    pub perception: PerceptionConfig,
    pub pickup: PickupConfig,
    pub combat: CombatConfig,
    pub skill_bar: SkillBarConfig,
    pub calibration: CalibrationConfig,
    pub arbiter: ArbiterConfig,
    pub runner: RunnerConfig,
}

impl CoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: CoreConfig =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.region.is_empty() {
            return Err(CoreError::Config("capture region is empty".into()));
        }
        if self.capture.grid_rows == 0 || self.capture.grid_cols == 0 {
            return Err(CoreError::Config("grid must have at least one cell".into()));
        }
        if self.gait.min_move_secs > self.gait.max_move_secs {
            return Err(CoreError::Config(format!(
                "min move time {} exceeds max {}",
                self.gait.min_move_secs, self.gait.max_move_secs
            )));
        }
        let p = &self.gait.profile;
        if p.horizontal <= 0.0 || p.vertical <= 0.0 || p.diagonal <= 0.0 {
            return Err(CoreError::Config("gait speeds must be positive".into()));
        }
        let (lo, hi) = self.combat.abilities_per_round;
        if lo == 0 || lo > hi {
            return Err(CoreError::Config(format!(
                "abilities per round range {lo}..={hi} must be non-empty and start at 1 or more"
            )));
        }
        Ok(())
    }

    pub fn stop_slice(&self) -> Duration {
        Duration::from_millis(self.runner.stop_slice_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Game client area in screen coordinates.
    pub region: BBox,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub capture_budget_ms: u64,
    pub detect_budget_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            region: BBox::from_xywh(0, 0, 1067, 600),
            grid_rows: 3,
            grid_cols: 7,
            capture_budget_ms: 50,
            detect_budget_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitConfig {
    pub profile: GaitProfile,
    /// Below this distance the larger start-up pad applies.
    pub short_distance: f64,
    pub short_pad_secs: f64,
    pub long_pad_secs: f64,
    pub min_move_secs: f64,
    pub max_move_secs: f64,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            profile: GaitProfile::default(),
            short_distance: 50.0,
            short_pad_secs: 0.02,
            long_pad_secs: 0.01,
            min_move_secs: 0.05,
            max_move_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub min_move_distance: f64,
    pub waypoint_run_distance: f64,
    pub combat_run_distance: f64,
    /// `||dx| - |dy||` below this counts as a true diagonal.
    pub near_diagonal_tolerance: f64,
    /// Diagonal runs shorter than this always use the pre-establish variant.
    pub short_hop_distance: f64,
    /// Pins every diagonal run to one choreography instead of choosing.
    pub diagonal_variant: Option<DiagonalRunVariant>,
    pub facing_secs: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_move_distance: 30.0,
            waypoint_run_distance: 150.0,
            combat_run_distance: 80.0,
            near_diagonal_tolerance: 50.0,
            short_hop_distance: 50.0,
            diagonal_variant: None,
            facing_secs: 0.1,
        }
    }
}

/// Maps a template pattern onto a detection label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub pattern: String,
    pub label: Label,
    pub threshold: f32,
}

impl TemplateSpec {
    pub fn new(pattern: &str, label: Label, threshold: f32) -> Self {
        Self {
            pattern: pattern.to_string(),
            label,
            threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// The detector boxes the name plate; feet are this far below its centre.
    pub agent_foot_offset: i32,
    pub templates: Vec<TemplateSpec>,
    /// Pattern id of the retry affordance, looked up only after a pickup.
    pub retry_pattern: String,
    pub retry_threshold: f32,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            agent_foot_offset: 80,
            templates: vec![
                TemplateSpec::new("shifoujixu", Label::PickupMarker, 0.8),
                TemplateSpec::new("qianjin", Label::WaypointMarker, 0.8),
                TemplateSpec::new("zhongmochongbaizhe", Label::MapMarker, 0.8),
            ],
            retry_pattern: "retry_button".to_string(),
            retry_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupConfig {
    pub confirm_secs: f64,
    pub window_secs: f64,
    pub poll_secs: f64,
    /// Press time for the gather, retry and switch keys.
    pub key_press_secs: f64,
    pub gather_settle_secs: f64,
    pub collect_secs: f64,
    pub collect_press_secs: f64,
    pub collect_gap_secs: f64,
    /// Inset applied to the retry button before the grey test.
    pub retry_padding: i32,
    pub grey_max_spread: f64,
    pub grey_max_saturation: f64,
}

impl Default for PickupConfig {
    fn default() -> Self {
        Self {
            confirm_secs: 0.5,
            window_secs: 1.5,
            poll_secs: 0.05,
            key_press_secs: 0.14,
            gather_settle_secs: 0.5,
            collect_secs: 2.5,
            collect_press_secs: 0.1,
            collect_gap_secs: 0.15,
            retry_padding: 5,
            grey_max_spread: 10.0,
            grey_max_saturation: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub round_cap: u32,
    pub abilities_per_round: (u32, u32),
    pub ability_press_secs: [f64; 2],
    pub ability_settle_secs: [f64; 2],
    pub attack_press_secs: [f64; 2],
    pub attack_settle_secs: [f64; 2],
    /// A re-detection within this many pixels on both axes is the same target.
    pub proximity: i32,
    /// Approach the target first when farther than this.
    pub engage_distance: f64,
    pub round_rest_secs: f64,
    pub failure_cap: u32,
    pub seed: Option<u64>,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            round_cap: 10,
            abilities_per_round: (1, 3),
            ability_press_secs: [0.1311, 0.1511],
            ability_settle_secs: [0.1011, 0.1511],
            attack_press_secs: [0.01011, 0.03011],
            attack_settle_secs: [0.01011, 0.03011],
            proximity: 100,
            engage_distance: 50.0,
            round_rest_secs: 0.5,
            failure_cap: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillBarConfig {
    pub area: BBox,
    pub rows: Vec<String>,
    pub inset_x: i32,
    pub inset_y: i32,
    /// RGB colour of a ready ability icon.
    pub ready_color: [u8; 3],
    pub tolerance: u8,
    /// Matching pixels needed before a slot counts as ready.
    pub min_ready_pixels: usize,
}

impl Default for SkillBarConfig {
    fn default() -> Self {
        Self {
            area: BBox::new(434, 534, 619, 593),
            rows: vec!["qwerty".to_string(), "asdfgh".to_string()],
            inset_x: 4,
            inset_y: 9,
            ready_color: [248, 230, 106],
            tolerance: 20,
            min_ready_pixels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub panel_settle_secs: f64,
    pub panel_press_secs: f64,
    /// Tried in order until one parses.
    pub regions: Vec<BBox>,
    pub allowed_chars: String,
    pub max_attempts: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            panel_settle_secs: 0.8,
            panel_press_secs: 0.1,
            regions: vec![
                BBox::from_xywh(330, 465, 46, 14),
                BBox::from_xywh(320, 460, 80, 25),
                BBox::from_xywh(340, 470, 60, 20),
            ],
            allowed_chars: "0123456789%+-.".to_string(),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Ticks to wait in the same cell after navigating before trying again.
    pub waypoint_retry_ticks: u32,
    pub buff_press_secs: f64,
    pub idle_backoff_secs: f64,
    /// Ticks without a sighting after which the committed target is dropped.
    pub target_memory_ticks: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            waypoint_retry_ticks: 3,
            buff_press_secs: 0.14,
            idle_backoff_secs: 0.1,
            target_memory_ticks: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub total_characters: u32,
    pub stop_slice_ms: u64,
    pub perception_backoff_secs: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            total_characters: 1,
            stop_slice_ms: 200,
            perception_backoff_secs: 0.2,
        }
    }
}
