//! Direction-dependent movement speed and hold duration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{secs, GaitConfig};

/// Which of the three measured speeds applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionClass {
    Horizontal,
    Vertical,
    Diagonal,
}

/// Pixels per second at 100 % speed. The client's vertical axis is
/// foreshortened, hence the large anisotropy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitProfile {
    pub horizontal: f64,
    pub vertical: f64,
    pub diagonal: f64,
}

impl Default for GaitProfile {
    fn default() -> Self {
        Self {
            horizontal: 480.0,
            vertical: 168.0,
            diagonal: 300.0,
        }
    }
}

impl GaitProfile {
    pub fn speed(&self, class: DirectionClass) -> f64 {
        match class {
            DirectionClass::Horizontal => self.horizontal,
            DirectionClass::Vertical => self.vertical,
            DirectionClass::Diagonal => self.diagonal,
        }
    }
}

/// A speed percentage that is non-positive or not finite is read as 100 %.
/// OCR garbage must never produce an unbounded hold.
pub fn sanitize_speed_pct(speed_pct: f64) -> f64 {
    if speed_pct.is_finite() && speed_pct > 0.0 {
        speed_pct
    } else {
        100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaitSpeedModel {
    config: GaitConfig,
}

impl GaitSpeedModel {
    pub fn new(config: GaitConfig) -> Self {
        Self { config }
    }

    pub fn profile(&self) -> &GaitProfile {
        &self.config.profile
    }

    /// Real pixels per second for `class` at `speed_pct`.
    pub fn effective_speed(&self, class: DirectionClass, speed_pct: f64) -> f64 {
        self.config.profile.speed(class) * sanitize_speed_pct(speed_pct) / 100.0
    }

    /// Hold time needed to cover `distance`, clamped to the configured range.
    /// Zero for a non-positive distance; callers must not emit a command then.
    pub fn move_duration(&self, distance: f64, class: DirectionClass, speed_pct: f64) -> Duration {
        if !(distance > 0.0) {
            return Duration::ZERO;
        }
        let speed = self.effective_speed(class, speed_pct);
        let long = distance / speed + self.config.long_pad_secs;
        let raw = if distance < self.config.short_distance {
            // Capped at the threshold's own duration so the pad step never
            // makes a shorter move take longer than a longer one.
            let threshold = self.config.short_distance / speed + self.config.long_pad_secs;
            (distance / speed + self.config.short_pad_secs).min(threshold).max(long)
        } else {
            long
        };
        let clamped = raw.clamp(self.config.min_move_secs, self.config.max_move_secs);
        secs(clamped)
    }
}

impl Default for GaitSpeedModel {
    fn default() -> Self {
        Self::new(GaitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(d: Duration, expected: f64) -> bool {
        (d.as_secs_f64() - expected).abs() < 1e-3
    }

    #[test]
    fn test_horizontal_scenario() {
        let model = GaitSpeedModel::default();
        let d = model.move_duration(100.0, DirectionClass::Horizontal, 100.0);
        assert!(approx(d, 100.0 / 480.0 + 0.01), "got {d:?}");
    }

    #[test]
    fn test_diagonal_scenarios() {
        let model = GaitSpeedModel::default();
        let distance = 100f64.hypot(100.0);
        let full = model.move_duration(distance, DirectionClass::Diagonal, 100.0);
        assert!(approx(full, 0.4814), "got {full:?}");

        assert_eq!(model.effective_speed(DirectionClass::Diagonal, 50.0), 150.0);
        let half = model.move_duration(distance, DirectionClass::Diagonal, 50.0);
        assert!(approx(half, 0.9528), "got {half:?}");

        // duration * pct is roughly constant once the pad is removed
        let a = (full.as_secs_f64() - 0.01) * 100.0;
        let b = (half.as_secs_f64() - 0.01) * 50.0;
        assert!((a - b).abs() < 1e-3);
    }

    #[test]
    fn test_monotonic_and_clamped() {
        let model = GaitSpeedModel::default();
        for class in [
            DirectionClass::Horizontal,
            DirectionClass::Vertical,
            DirectionClass::Diagonal,
        ] {
            let mut previous = Duration::ZERO;
            for step in 1..=200 {
                let d = model.move_duration(f64::from(step) * 5.0, class, 87.0);
                assert!(d >= previous, "{class:?} not monotonic at {step}");
                assert!(d >= Duration::from_millis(50));
                assert!(d <= Duration::from_secs(2));
                previous = d;
            }
        }
    }

    #[test]
    fn test_short_distance_pad() {
        let model = GaitSpeedModel::default();
        let d = model.move_duration(30.0, DirectionClass::Horizontal, 100.0);
        assert!(approx(d, 30.0 / 480.0 + 0.02), "got {d:?}");
    }

    #[test]
    fn test_monotonic_across_pad_threshold() {
        let model = GaitSpeedModel::default();
        let below = model.move_duration(49.99, DirectionClass::Horizontal, 100.0);
        let at = model.move_duration(50.0, DirectionClass::Horizontal, 100.0);
        assert!(below <= at, "{below:?} > {at:?}");
    }

    #[test]
    fn test_degenerate_inputs() {
        let model = GaitSpeedModel::default();
        assert_eq!(model.move_duration(0.0, DirectionClass::Vertical, 100.0), Duration::ZERO);
        assert_eq!(model.move_duration(-5.0, DirectionClass::Vertical, 100.0), Duration::ZERO);

        // non-positive speed falls back to 100 %
        let fallback = model.move_duration(100.0, DirectionClass::Horizontal, 0.0);
        let nominal = model.move_duration(100.0, DirectionClass::Horizontal, 100.0);
        assert_eq!(fallback, nominal);
        assert_eq!(
            model.move_duration(100.0, DirectionClass::Horizontal, -20.0),
            nominal
        );
        assert_eq!(
            model.move_duration(100.0, DirectionClass::Horizontal, f64::NAN),
            nominal
        );
    }
}
