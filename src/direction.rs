//! 8-way direction resolution in screen coordinates
//!
//! Angles are measured with `atan2(dy, dx)` where `dy` grows downwards, so
//! 0 degrees is east, 90 is south, 180 is west and 270 is north. The circle is
//! split into eight symmetric 45 degree sectors centred on the compass points.
//! Each sector is half-open, `[centre - 22.5, centre + 22.5)`: an angle lying
//! exactly on a boundary belongs to the sector with the larger centre angle
//! (22.5 resolves to south-east, 337.5 to east).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::gait::DirectionClass;
use crate::input::DirectionKey;

/// One of the eight compass directions, expressed as a set of arrow keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectionSet {
    E,
    SE,
    S,
    SW,
    W,
    NW,
    N,
    NE,
}

impl DirectionSet {
    /// Sector order starting at 0 degrees and turning towards +y.
    pub const SECTORS: [DirectionSet; 8] = [
        DirectionSet::E,
        DirectionSet::SE,
        DirectionSet::S,
        DirectionSet::SW,
        DirectionSet::W,
        DirectionSet::NW,
        DirectionSet::N,
        DirectionSet::NE,
    ];

    /// Primitive keys, horizontal key first for diagonals.
    pub fn keys(self) -> &'static [DirectionKey] {
        use DirectionKey::*;
        match self {
            DirectionSet::E => &[Right],
            DirectionSet::SE => &[Right, Down],
            DirectionSet::S => &[Down],
            DirectionSet::SW => &[Left, Down],
            DirectionSet::W => &[Left],
            DirectionSet::NW => &[Left, Up],
            DirectionSet::N => &[Up],
            DirectionSet::NE => &[Right, Up],
        }
    }

    pub fn is_diagonal(self) -> bool {
        self.keys().len() == 2
    }

    pub fn class(self) -> DirectionClass {
        match self {
            DirectionSet::E | DirectionSet::W => DirectionClass::Horizontal,
            DirectionSet::N | DirectionSet::S => DirectionClass::Vertical,
            _ => DirectionClass::Diagonal,
        }
    }

    /// Compass centre angle in degrees.
    pub fn centre_angle(self) -> f64 {
        let index = Self::SECTORS.iter().position(|s| *s == self).unwrap_or(0);
        index as f64 * 45.0
    }

    /// Rebuilds a set from raw keys, rejecting anything that is not a valid
    /// single key or a pair of non-opposing keys.
    pub fn from_keys(keys: &[DirectionKey]) -> Result<Self> {
        use DirectionKey::*;
        let set = match keys {
            [Right] => DirectionSet::E,
            [Left] => DirectionSet::W,
            [Up] => DirectionSet::N,
            [Down] => DirectionSet::S,
            [a, b] if *a == b.opposite() || a == b => {
                return Err(CoreError::InvariantViolation(format!(
                    "diagonal built from {a:?} and {b:?}"
                )))
            }
            [a, b] => {
                let (h, v) = if a.is_horizontal() { (*a, *b) } else { (*b, *a) };
                match (h, v) {
                    (Right, Down) => DirectionSet::SE,
                    (Left, Down) => DirectionSet::SW,
                    (Left, Up) => DirectionSet::NW,
                    (Right, Up) => DirectionSet::NE,
                    _ => {
                        return Err(CoreError::InvariantViolation(format!(
                            "keys {a:?}+{b:?} do not form a diagonal"
                        )))
                    }
                }
            }
            _ => {
                return Err(CoreError::InvariantViolation(format!(
                    "direction set needs 1 or 2 keys, got {}",
                    keys.len()
                )))
            }
        };
        Ok(set)
    }
}

/// Angle of `(dx, dy)` in degrees, normalised to `[0, 360)`.
pub fn angle_degrees(dx: f64, dy: f64) -> f64 {
    let angle = dy.atan2(dx).to_degrees();
    let normalised = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalised >= 360.0 {
        0.0
    } else {
        normalised
    }
}

/// Sector containing `angle` (degrees, any range).
pub fn sector_for_angle(angle: f64) -> DirectionSet {
    let shifted = (angle + 22.5).rem_euclid(360.0);
    let index = (shifted / 45.0).floor() as usize % 8;
    DirectionSet::SECTORS[index]
}

/// Outcome of [`DirectionResolver::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Displacement below the minimum; no key should be pressed.
    Arrived,
    Move {
        set: DirectionSet,
        class: DirectionClass,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionResolver {
    min_displacement: f64,
}

impl DirectionResolver {
    pub fn new(min_displacement: f64) -> Self {
        Self { min_displacement }
    }

    pub fn resolve(&self, dx: f64, dy: f64) -> Resolution {
        if dx.hypot(dy) < self.min_displacement {
            return Resolution::Arrived;
        }
        let set = sector_for_angle(angle_degrees(dx, dy));
        Resolution::Move {
            set,
            class: set.class(),
        }
    }
}

impl Default for DirectionResolver {
    fn default() -> Self {
        Self::new(30.0)
    }
}

/// Key choreography used to start a diagonal run. All four end with both
/// keys held; they differ only in the order and spacing of taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagonalRunVariant {
    /// Fast sequential: tap and hold the first key, then tap and hold the second.
    V1,
    /// Pre-establish: run on the first key, then add the second without a tap.
    V2,
    /// Micro-staggered double tap on both keys, then hold both.
    V3,
    /// Both keys tapped together, then both held together.
    V4,
}

/// Picks a run variant from the displacement. `tolerance` decides what counts
/// as a true diagonal; hops shorter than `short_hop` always use V2. V4 is
/// never chosen automatically; it is only reachable by pinning it in the
/// config.
pub fn select_diagonal_variant(
    dx: f64,
    dy: f64,
    distance: f64,
    tolerance: f64,
    short_hop: f64,
) -> DiagonalRunVariant {
    if distance < short_hop {
        return DiagonalRunVariant::V2;
    }
    let near_diagonal = (dx.abs() - dy.abs()).abs() < tolerance;
    let angle = angle_degrees(dx, dy);
    let in_band = |lo: f64, hi: f64| (lo..=hi).contains(&angle);

    if in_band(15.0, 75.0) || in_band(195.0, 255.0) {
        // south-east / north-west pair
        if near_diagonal {
            DiagonalRunVariant::V2
        } else {
            DiagonalRunVariant::V1
        }
    } else if in_band(105.0, 165.0) || in_band(285.0, 345.0) {
        // south-west / north-east pair
        if near_diagonal {
            DiagonalRunVariant::V2
        } else {
            DiagonalRunVariant::V3
        }
    } else {
        DiagonalRunVariant::V2
    }
}
