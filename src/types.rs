//! Common types shared by perception, planning and arbitration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Integer pixel position inside the capture region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        let dx = f64::from(other.x - self.x);
        let dy = f64::from(other.y - self.y);
        dx.hypot(dy)
    }
}

/// Axis-aligned box, `(x1, y1)` inclusive top-left, `(x2, y2)` exclusive bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from a top-left corner and a size.
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn centroid(&self) -> Point {
        Point::new(
            self.x1 + (self.x2 - self.x1) / 2,
            self.y1 + (self.y2 - self.y1) / 2,
        )
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    /// Shrink every side by `pad`; returns `self` unchanged if that would empty it.
    pub fn inset(&self, pad: i32) -> BBox {
        let inner = BBox::new(self.x1 + pad, self.y1 + pad, self.x2 - pad, self.y2 - pad);
        if inner.is_empty() {
            *self
        } else {
            inner
        }
    }
}

/// What a detection is, as produced by the detector or the template table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Agent,
    Monster,
    Boss,
    Door,
    WaypointMarker,
    PickupMarker,
    MapMarker,
    RetryButton,
    #[serde(other)]
    Unknown,
}

/// Closed dispatch category of a [`Label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    /// Something to fight.
    Attackable,
    /// Something to walk to.
    Navigational,
    /// Something that interrupts everything else.
    EventMarker,
    /// Scenery: the agent itself, map markers, UI affordances.
    Landmark,
}

impl Label {
    pub fn kind(self) -> LabelKind {
        match self {
            Label::Monster | Label::Boss => LabelKind::Attackable,
            Label::Door | Label::WaypointMarker => LabelKind::Navigational,
            Label::PickupMarker => LabelKind::EventMarker,
            Label::Agent | Label::MapMarker | Label::RetryButton | Label::Unknown => {
                LabelKind::Landmark
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionSource {
    Detector,
    TemplateMatch,
}

/// One labelled box from the current frame. Never persisted across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: Label,
    pub bbox: BBox,
    pub confidence: Option<f32>,
    pub source: DetectionSource,
}

impl Detection {
    pub fn new(label: Label, bbox: BBox) -> Self {
        Self {
            label,
            bbox,
            confidence: None,
            source: DetectionSource::Detector,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: DetectionSource) -> Self {
        self.source = source;
        self
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

/// Centroid of the union of all boxes, or `None` for an empty set.
pub fn union_centroid<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<Point> {
    boxes
        .into_iter()
        .copied()
        .reduce(|acc, b| acc.union(&b))
        .map(|b| b.centroid())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Open,
    Closed,
}

/// Door states keyed by grid cell (`"row-col"`, 1-based).
pub type DoorStates = HashMap<String, DoorState>;

/// Room-level context supplied by the caller alongside each observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub map_id: Option<String>,
    pub doors: DoorStates,
}

impl RoomState {
    pub fn any_door_open(&self) -> bool {
        self.doors.values().any(|s| *s == DoorState::Open)
    }

    pub fn is_open(&self, cell: &str) -> bool {
        self.doors.get(cell) == Some(&DoorState::Open)
    }
}

/// What the agent is moving towards; selects the run threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Waypoint,
    Monster,
    Boss,
}

impl TargetKind {
    pub fn for_label(label: Label) -> Self {
        match label {
            Label::Boss => TargetKind::Boss,
            Label::Monster => TargetKind::Monster,
            _ => TargetKind::Waypoint,
        }
    }
}

/// Coarse game state inferred from a detection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroState {
    Town,
    Dungeon,
    Event,
}

impl MacroState {
    pub fn classify(detections: &[Detection]) -> Self {
        if detections.iter().any(|d| d.label == Label::PickupMarker) {
            return MacroState::Event;
        }
        let in_dungeon = detections.iter().any(|d| {
            d.label == Label::MapMarker
                || matches!(
                    d.label.kind(),
                    LabelKind::Attackable | LabelKind::Navigational
                )
        });
        if in_dungeon {
            MacroState::Dungeon
        } else {
            MacroState::Town
        }
    }
}

/// Result of one arbiter tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionTaken {
    /// Pickup confirmed and collected; the instance can be replayed.
    RetryInstance,
    /// Pickup confirmed and collected; this character is done.
    RequestCharacterSwitch,
    /// Pickup marker flickered but never held long enough.
    PickupRejected,
    /// Walked (or clicked) towards a waypoint.
    Navigating { target: Point },
    /// Waypoint already handled for this cell, waiting for the room to change.
    AwaitingTransition,
    TargetDefeated { label: Label },
    TargetSurvived { label: Label, attempts: u32 },
    /// Consecutive-failure cap hit; target state dropped.
    TargetAbandoned { label: Label },
    /// Nothing actionable this tick.
    Idle,
}
