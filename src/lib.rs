//! DNF Core - decision core for a screen-observed dungeon agent
//!
//! Turns per-frame detections into timed key presses:
//! - Direction and gait planning with per-axis speeds
//! - Pickup > navigation > combat arbitration
//! - Bounded combat rounds and speed calibration
//!
//! Capture, detection and OCR are supplied by the caller through the traits
//! in [`perception`]; key injection through [`input::InputSink`].

pub mod arbiter;
pub mod calibration;
pub mod capture;
pub mod clock;
pub mod combat;
pub mod config;
pub mod detection;
pub mod direction;
pub mod error;
pub mod gait;
pub mod input;
pub mod perception;
pub mod pickup;
pub mod planner;
pub mod routing;
pub mod runner;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use arbiter::{ArbiterContext, PriorityArbiter, PriorityEvent};
pub use clock::{Clock, StopSignal, SystemClock};
pub use combat::CombatRoutine;
pub use config::CoreConfig;
pub use direction::{DirectionResolver, DirectionSet};
pub use error::{CoreError, ErrorKind, Result};
pub use gait::GaitSpeedModel;
pub use planner::{MotionCommand, MotionPlanner};
pub use runner::{Agent, RunSummary};
pub use status::TickReport;
pub use types::{ActionTaken, BBox, Detection, Label, Point, RoomState};

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber filtered by `RUST_LOG` (INFO by default).
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;

    use crate::calibration::parse_speed_text;
    use crate::capture::rgba_to_frame;
    use crate::config::CoreConfig;
    use crate::detection::{region_is_grey, SkillBar};
    use crate::direction::{DirectionResolver, Resolution};
    use crate::gait::{DirectionClass, GaitSpeedModel};
    use crate::planner::plan_command;
    use crate::types::{BBox, Point, TargetKind};

    fn runtime_error(e: impl std::fmt::Display) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string())
    }

    fn value_error(e: impl std::fmt::Display) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
    }

    fn load_config(path: Option<&str>) -> PyResult<CoreConfig> {
        match path {
            Some(p) => CoreConfig::load(p).map_err(runtime_error),
            None => Ok(CoreConfig::default()),
        }
    }

    /// Parse a snake_case enum name, e.g. `"diagonal"` or `"boss"`.
    fn parse_name<T: serde::de::DeserializeOwned>(name: &str) -> PyResult<T> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).map_err(value_error)
    }

    /// Arrow keys for a displacement, or None when already there
    #[pyfunction]
    fn resolve_direction(dx: f64, dy: f64) -> PyResult<Option<Vec<String>>> {
        match DirectionResolver::default().resolve(dx, dy) {
            Resolution::Arrived => Ok(None),
            Resolution::Move { set, .. } => Ok(Some(
                set.keys()
                    .iter()
                    .map(|k| format!("{k:?}").to_lowercase())
                    .collect(),
            )),
        }
    }

    /// Hold time in seconds for a distance in pixels
    #[pyfunction]
    fn move_duration(distance: f64, class: &str, speed_pct: f64) -> PyResult<f64> {
        let class: DirectionClass = parse_name(class)?;
        let model = GaitSpeedModel::new(CoreConfig::default().gait);
        Ok(model.move_duration(distance, class, speed_pct).as_secs_f64())
    }

    /// Full motion command as JSON, or None when no motion is needed
    #[pyfunction]
    #[pyo3(signature = (origin, destination, speed_pct, target, config_path=None))]
    fn plan_motion(
        origin: (i32, i32),
        destination: (i32, i32),
        speed_pct: f64,
        target: &str,
        config_path: Option<&str>,
    ) -> PyResult<Option<String>> {
        let config = load_config(config_path)?;
        let target: TargetKind = parse_name(target)?;
        let command = plan_command(
            &GaitSpeedModel::new(config.gait.clone()),
            &DirectionResolver::new(config.motion.min_move_distance),
            &config.motion,
            Point::new(origin.0, origin.1),
            Point::new(destination.0, destination.1),
            speed_pct,
            target,
        );
        command
            .map(|c| serde_json::to_string(&c).map_err(runtime_error))
            .transpose()
    }

    /// Speed percentage from stat panel OCR text
    #[pyfunction]
    fn parse_speed(text: &str) -> PyResult<f64> {
        parse_speed_text(text).map_err(value_error)
    }

    /// Ability keys whose skill bar icon shows the ready colour
    #[pyfunction]
    #[pyo3(signature = (img_data, width, height, config_path=None))]
    fn ready_skills(
        img_data: Vec<u8>,
        width: u32,
        height: u32,
        config_path: Option<&str>,
    ) -> PyResult<Vec<char>> {
        let config = load_config(config_path)?;
        let frame = rgba_to_frame(img_data, width, height).map_err(value_error)?;
        Ok(SkillBar::from_config(&config.skill_bar).ready_skills(&frame))
    }

    /// Whether the retry button at the given box is coloured, not greyed out
    #[pyfunction]
    #[pyo3(signature = (img_data, width, height, button, config_path=None))]
    fn retry_available(
        img_data: Vec<u8>,
        width: u32,
        height: u32,
        button: (i32, i32, i32, i32),
        config_path: Option<&str>,
    ) -> PyResult<bool> {
        let config = load_config(config_path)?;
        let frame = rgba_to_frame(img_data, width, height).map_err(value_error)?;
        let (x1, y1, x2, y2) = button;
        let pickup = &config.pickup;
        let region = BBox::new(x1, y1, x2, y2).inset(pickup.retry_padding);
        Ok(!region_is_grey(&frame, region, pickup.grey_max_spread, pickup.grey_max_saturation))
    }

    /// Python module definition
    #[pymodule]
    fn dnf_core(_py: Python, m: &PyModule) -> PyResult<()> {
        crate::init_tracing();
        m.add_function(wrap_pyfunction!(resolve_direction, m)?)?;
        m.add_function(wrap_pyfunction!(move_duration, m)?)?;
        m.add_function(wrap_pyfunction!(plan_motion, m)?)?;
        m.add_function(wrap_pyfunction!(parse_speed, m)?)?;
        m.add_function(wrap_pyfunction!(ready_skills, m)?)?;
        m.add_function(wrap_pyfunction!(retry_available, m)?)?;
        Ok(())
    }
}
