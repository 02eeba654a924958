//! Movement speed read-out from the character stat panel

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{wait, Clock, StopSignal};
use crate::config::{secs, CalibrationConfig, CoreConfig};
use crate::error::{CoreError, Result};
use crate::input::Key;
use crate::perception::PerceptionContext;
use crate::planner::MotionPlanner;

static SPEED_PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn speed_pattern() -> Result<&'static Regex> {
    SPEED_PATTERN
        .get_or_init(|| Regex::new(r"([+-]?\d+\.?\d*)"))
        .as_ref()
        .map_err(|e| CoreError::InvariantViolation(e.to_string()))
}

/// Extracts the first number from OCR text. Readings above 200 lost their
/// decimal point and are divided by ten.
pub fn parse_speed_text(text: &str) -> Result<f64> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let token = speed_pattern()?
        .captures(&cleaned)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CoreError::Calibration(format!("no number in {text:?}")))?;
    let mut value: f64 = token
        .as_str()
        .parse()
        .map_err(|_| CoreError::Calibration(format!("unparsable {:?}", token.as_str())))?;
    if value > 200.0 {
        value /= 10.0;
    }
    if !(value > 0.0) {
        return Err(CoreError::Calibration(format!("non-positive speed {value}")));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedCalibration {
    pub percentage: f64,
    /// Clock time of the successful read.
    pub calibrated_at: Duration,
}

/// Cached speed percentage for the current character life.
#[derive(Debug, Clone)]
pub struct SpeedCalibrator {
    config: CalibrationConfig,
    slice: Duration,
    cache: Option<SpeedCalibration>,
    attempts: u32,
}

impl SpeedCalibrator {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            config: config.calibration.clone(),
            slice: config.stop_slice(),
            cache: None,
            attempts: 0,
        }
    }

    pub fn cached(&self) -> Option<SpeedCalibration> {
        self.cache
    }

    /// Cached percentage, or 100 when nothing was read.
    pub fn speed_pct(&self) -> f64 {
        self.cache.map(|c| c.percentage).unwrap_or(100.0)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn needs_calibration(&self) -> bool {
        self.cache.is_none() && self.attempts < self.config.max_attempts
    }

    /// Forget the reading; the next dungeon entry measures again.
    pub fn invalidate(&mut self) {
        self.cache = None;
        self.attempts = 0;
    }

    /// Opens the stat panel, reads the speed and closes the panel again, also
    /// when the read fails.
    pub fn calibrate(
        &mut self,
        perception: &PerceptionContext,
        planner: &mut MotionPlanner,
        clock: &dyn Clock,
        stop: &StopSignal,
    ) -> Result<SpeedCalibration> {
        self.attempts += 1;
        let press = secs(self.config.panel_press_secs);
        planner.tap(Key::StatPanel, press)?;

        let read = wait(clock, stop, secs(self.config.panel_settle_secs), self.slice)
            .and_then(|_| self.read(perception));

        let closed = planner.tap(Key::StatPanel, press);
        let percentage = match read {
            Ok(pct) => pct,
            Err(e) => {
                warn!(attempt = self.attempts, error = %e, "speed calibration failed, using 100%");
                return Err(e);
            }
        };
        closed?;

        let calibration = SpeedCalibration {
            percentage,
            calibrated_at: clock.now(),
        };
        info!(percentage, "movement speed calibrated");
        self.cache = Some(calibration);
        Ok(calibration)
    }

    fn read(&self, perception: &PerceptionContext) -> Result<f64> {
        let frame = perception
            .capture_frame()
            .map_err(|e| CoreError::Calibration(e.to_string()))?;
        let mut last = CoreError::Calibration("no OCR regions configured".into());
        for region in &self.config.regions {
            let parsed = perception
                .read_digits(&frame, *region, &self.config.allowed_chars)
                .map_err(|e| CoreError::Calibration(e.to_string()))
                .and_then(|text| parse_speed_text(&text));
            match parsed {
                Ok(pct) => return Ok(pct),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}
