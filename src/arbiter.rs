//! Per-tick priority arbitration
//!
//! Precedence is fixed: a confirmed pickup beats navigation, and any open
//! door or waypoint marker beats combat. Exactly one of the three runs per
//! tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::calibration::SpeedCalibrator;
use crate::clock::{wait, Clock, StopSignal};
use crate::combat::{CombatRoutine, EngageOutcome};
use crate::config::{secs, ArbiterConfig, CaptureConfig, CoreConfig};
use crate::error::{CoreError, ErrorKind, Result};
use crate::input::{Key, MouseButton};
use crate::perception::{Observation, PerceptionContext};
use crate::pickup::PickupRoutine;
use crate::planner::MotionPlanner;
use crate::routing::{grid_cell, RoutingTable};
use crate::types::{ActionTaken, BBox, Detection, Label, LabelKind, Point, RoomState, TargetKind};

/// Everything a routine needs to act: the eyes, the single key owner and time.
pub struct ArbiterContext {
    pub perception: PerceptionContext,
    pub planner: MotionPlanner,
    pub clock: Arc<dyn Clock>,
    pub stop: StopSignal,
    slice: Duration,
}

impl ArbiterContext {
    pub fn new(
        perception: PerceptionContext,
        planner: MotionPlanner,
        clock: Arc<dyn Clock>,
        stop: StopSignal,
        config: &CoreConfig,
    ) -> Self {
        Self {
            perception,
            planner,
            clock,
            stop,
            slice: config.stop_slice(),
        }
    }

    /// Sleep that wakes every stop slice to honour the stop signal.
    pub fn wait(&self, duration: Duration) -> Result<()> {
        wait(self.clock.as_ref(), &self.stop, duration, self.slice)
    }
}

/// The single most important thing visible this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorityEvent {
    Pickup(BBox),
    /// Marker box, or `None` when only the room state reports an open door.
    Waypoint(Option<BBox>),
    /// For several instances of one label the box is their union.
    Combat(Detection),
}

impl PriorityEvent {
    pub fn detect(detections: &[Detection], room: &RoomState) -> Option<Self> {
        if let Some(d) = detections.iter().find(|d| d.label.kind() == LabelKind::EventMarker) {
            return Some(PriorityEvent::Pickup(d.bbox));
        }
        let marker = detections
            .iter()
            .find(|d| d.label.kind() == LabelKind::Navigational)
            .map(|d| d.bbox);
        if marker.is_some() || room.any_door_open() {
            return Some(PriorityEvent::Waypoint(marker));
        }
        combat_target(detections).map(PriorityEvent::Combat)
    }
}

/// Boss over monster; several instances collapse into one union box.
pub fn combat_target(detections: &[Detection]) -> Option<Detection> {
    let label = [Label::Boss, Label::Monster]
        .into_iter()
        .find(|l| detections.iter().any(|d| d.label == *l))?;
    let bbox = detections
        .iter()
        .filter(|d| d.label == label)
        .map(|d| d.bbox)
        .reduce(|acc, b| acc.union(&b))?;
    Some(Detection::new(label, bbox))
}

/// The engagement the arbiter is committed to.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    pub label: Label,
    pub centroid: Point,
    pub attempts: u32,
    pub last_seen_frame: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct WaypointFlag {
    cell: Option<String>,
    ticks: u32,
}

pub struct PriorityArbiter {
    config: ArbiterConfig,
    capture: CaptureConfig,
    proximity: i32,
    engage_distance: f64,
    failure_cap: u32,
    routing: RoutingTable,
    pickup: PickupRoutine,
    combat: CombatRoutine,
    calibrator: SpeedCalibrator,
    target: Option<TargetState>,
    waypoint: Option<WaypointFlag>,
    buff_applied: bool,
    frame: u64,
}

impl PriorityArbiter {
    pub fn new(config: &CoreConfig, routing: RoutingTable) -> Self {
        Self {
            config: config.arbiter.clone(),
            capture: config.capture.clone(),
            proximity: config.combat.proximity,
            engage_distance: config.combat.engage_distance,
            failure_cap: config.combat.failure_cap,
            routing,
            pickup: PickupRoutine::new(&config.pickup),
            combat: CombatRoutine::new(config),
            calibrator: SpeedCalibrator::new(config),
            target: None,
            waypoint: None,
            buff_applied: false,
            frame: 0,
        }
    }

    pub fn target(&self) -> Option<&TargetState> {
        self.target.as_ref()
    }

    pub fn speed_pct(&self) -> f64 {
        self.calibrator.speed_pct()
    }

    pub fn calibrator(&self) -> &SpeedCalibrator {
        &self.calibrator
    }

    pub fn buff_applied(&self) -> bool {
        self.buff_applied
    }

    /// Drops per-instance state after leaving a dungeon.
    pub fn reset_instance(&mut self) {
        self.target = None;
        self.waypoint = None;
        self.buff_applied = false;
    }

    /// New character: the speed reading belongs to the previous one.
    pub fn on_character_switch(&mut self) {
        info!("character switch, invalidating speed calibration");
        self.reset_instance();
        self.calibrator.invalidate();
    }

    pub fn tick(
        &mut self,
        ctx: &mut ArbiterContext,
        observation: &Observation,
        room: &RoomState,
    ) -> Result<ActionTaken> {
        self.frame += 1;
        ctx.stop.check()?;

        let event = PriorityEvent::detect(&observation.detections, room);
        if let Some(PriorityEvent::Pickup(_)) = event {
            return self.handle_pickup(ctx);
        }

        if observation.has(Label::MapMarker) {
            self.enter_dungeon_hooks(ctx)?;
        }

        match event {
            Some(PriorityEvent::Waypoint(marker)) => self.navigate(ctx, observation, room, marker),
            Some(PriorityEvent::Combat(target)) => {
                self.waypoint = None;
                self.fight(ctx, observation, target)
            }
            _ => {
                self.waypoint = None;
                self.forget_stale_target();
                ctx.wait(secs(self.config.idle_backoff_secs))?;
                Ok(ActionTaken::Idle)
            }
        }
    }

    /// A target survives short detector dropouts; it is forgotten only after
    /// more than `target_memory_ticks` ticks without a sighting.
    fn forget_stale_target(&mut self) {
        let Some(t) = self.target.as_ref() else {
            return;
        };
        let unseen = self.frame.saturating_sub(t.last_seen_frame);
        if unseen > self.config.target_memory_ticks {
            debug!(label = ?t.label, unseen, "target lost");
            self.target = None;
        }
    }

    fn handle_pickup(&mut self, ctx: &mut ArbiterContext) -> Result<ActionTaken> {
        ctx.planner.stop_all()?;
        self.target = None;
        if !self.pickup.confirm(ctx)? {
            debug!("pickup marker did not hold, ignoring");
            return Ok(ActionTaken::PickupRejected);
        }
        info!("pickup confirmed");
        let action = self.pickup.run(ctx)?;
        self.reset_instance();
        Ok(action)
    }

    fn enter_dungeon_hooks(&mut self, ctx: &mut ArbiterContext) -> Result<()> {
        if !self.buff_applied {
            ctx.planner.tap(Key::Buff, secs(self.config.buff_press_secs))?;
            self.buff_applied = true;
            info!("buff applied");
        }
        if self.calibrator.needs_calibration() {
            match self.calibrator.calibrate(
                &ctx.perception,
                &mut ctx.planner,
                ctx.clock.as_ref(),
                &ctx.stop,
            ) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Calibration => {
                    warn!(error = %e, attempts = self.calibrator.attempts(), "keeping default speed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn navigate(
        &mut self,
        ctx: &mut ArbiterContext,
        observation: &Observation,
        room: &RoomState,
        marker: Option<BBox>,
    ) -> Result<ActionTaken> {
        // doors outrank fights
        self.target = None;

        let agent = observation.agent_position();
        let cell = agent.map(|p| {
            grid_cell(p, self.capture.region, self.capture.grid_rows, self.capture.grid_cols)
        });

        if let Some(flag) = self.waypoint.as_mut() {
            if flag.cell == cell && flag.ticks < self.config.waypoint_retry_ticks {
                flag.ticks += 1;
                debug!(?cell, ticks = flag.ticks, "waypoint handled, waiting for transition");
                return Ok(ActionTaken::AwaitingTransition);
            }
        }

        let routed = match (room.map_id.as_deref(), cell.as_deref()) {
            (Some(map), Some(cell)) => self.routing.lookup(map, cell, room),
            _ => None,
        };
        let target = routed.or_else(|| {
            marker.map(|b| self.routing.marker_target.unwrap_or_else(|| b.centroid()))
        });
        let Some(target) = target else {
            debug!(?cell, map = ?room.map_id, "door open but no route");
            return Ok(ActionTaken::AwaitingTransition);
        };

        match agent {
            Some(agent) => {
                let speed = self.calibrator.speed_pct();
                ctx.planner.move_to(agent, target, speed, TargetKind::Waypoint)?;
            }
            None => {
                debug!(?target, "agent not visible, clicking waypoint");
                ctx.planner.click(target, MouseButton::Left)?;
            }
        }
        info!(?target, ?cell, "navigating");
        self.waypoint = Some(WaypointFlag { cell, ticks: 0 });
        Ok(ActionTaken::Navigating { target })
    }

    fn fight(
        &mut self,
        ctx: &mut ArbiterContext,
        observation: &Observation,
        detection: Detection,
    ) -> Result<ActionTaken> {
        let label = detection.label;
        let centroid = detection.centroid();
        let same = self.target.as_ref().is_some_and(|t| {
            t.label == label
                && (t.centroid.x - centroid.x).abs() < self.proximity
                && (t.centroid.y - centroid.y).abs() < self.proximity
        });
        if !same {
            info!(?label, ?centroid, "target committed");
            self.target = Some(TargetState {
                label,
                centroid,
                attempts: 0,
                last_seen_frame: self.frame,
            });
        }
        if let Some(t) = self.target.as_mut() {
            t.centroid = centroid;
            t.last_seen_frame = self.frame;
        }

        let mut agent = observation.agent_position();
        if let Some(from) = agent {
            if from.distance_to(centroid) > self.engage_distance {
                let speed = self.calibrator.speed_pct();
                ctx.planner.move_to(from, centroid, speed, TargetKind::for_label(label))?;
                // facing is fixed by the approach itself
                agent = None;
            }
        }

        match self.combat.engage(ctx, observation, label, centroid, agent)? {
            EngageOutcome::Dead => {
                self.target = None;
                Ok(ActionTaken::TargetDefeated { label })
            }
            EngageOutcome::Alive => {
                let attempts = match self.target.as_mut() {
                    Some(t) => {
                        t.attempts += 1;
                        t.attempts
                    }
                    None => {
                        return Err(CoreError::InvariantViolation(
                            "engagement without a committed target".into(),
                        ))
                    }
                };
                if attempts > self.failure_cap {
                    warn!(?label, attempts, "target abandoned");
                    self.target = None;
                    Ok(ActionTaken::TargetAbandoned { label })
                } else {
                    Ok(ActionTaken::TargetSurvived { label, attempts })
                }
            }
        }
    }
}
