//! Time-boxed movement planning and execution
//!
//! `MotionPlanner` is the single owner of the four direction keys. Every
//! motion starts and ends with [`MotionPlanner::stop_all`], so no key can stay
//! down after a motion completes, fails or is cancelled.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{wait, Clock, StopSignal};
use crate::config::{secs, CoreConfig, MotionConfig};
use crate::direction::{select_diagonal_variant, DirectionResolver, DirectionSet, Resolution};
use crate::error::{CoreError, ErrorKind, Result};
use crate::gait::{DirectionClass, GaitSpeedModel};
use crate::input::{DirectionKey, InputSink, Key, MouseButton};
use crate::types::{Point, TargetKind};

pub use crate::direction::DiagonalRunVariant;

const TAP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gait {
    Walk,
    Run,
}

/// One primitive in a key choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Press and release after the given time.
    Tap(DirectionKey, Duration),
    /// Press and release two keys together.
    Chord(DirectionKey, DirectionKey, Duration),
    /// Key down, left down until the motion ends.
    Hold(DirectionKey),
    Pause(Duration),
    /// Keep everything held for the planned duration.
    Sustain(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub directions: DirectionSet,
    pub class: DirectionClass,
    pub distance: f64,
    pub duration: Duration,
    pub gait: Gait,
    pub run_variant: Option<DiagonalRunVariant>,
}

impl MotionCommand {
    /// A run variant belongs to diagonal runs only.
    pub fn validate(&self) -> Result<()> {
        DirectionSet::from_keys(self.directions.keys())?;
        let needs_variant = self.gait == Gait::Run && self.directions.is_diagonal();
        if needs_variant != self.run_variant.is_some() {
            return Err(CoreError::InvariantViolation(format!(
                "{:?} {:?} carries run variant {:?}",
                self.gait, self.directions, self.run_variant
            )));
        }
        if self.duration.is_zero() {
            return Err(CoreError::InvariantViolation("zero-length motion".into()));
        }
        Ok(())
    }

    /// Key choreography for this command. Every sequence ends with each key
    /// of the direction set held, followed by a single `Sustain`.
    pub fn choreography(&self) -> Vec<Step> {
        use Step::*;
        let keys = self.directions.keys();
        let ms = Duration::from_millis;
        let mut steps = match (keys, self.gait) {
            (&[k], Gait::Walk) => vec![Hold(k)],
            // double tap: the client upgrades a quick re-press to a run
            (&[k], Gait::Run) => vec![Tap(k, TAP), Pause(ms(10)), Hold(k)],
            (&[a, b], Gait::Walk) => vec![Hold(a), Hold(b)],
            (&[a, b], Gait::Run) => match self.run_variant.unwrap_or(DiagonalRunVariant::V2) {
                DiagonalRunVariant::V1 => vec![
                    Tap(a, TAP),
                    Pause(ms(3)),
                    Hold(a),
                    Pause(ms(5)),
                    Tap(b, TAP),
                    Pause(ms(3)),
                    Hold(b),
                ],
                DiagonalRunVariant::V2 => {
                    vec![Tap(a, TAP), Pause(ms(20)), Hold(a), Pause(ms(50)), Hold(b)]
                }
                DiagonalRunVariant::V3 => vec![
                    Tap(a, TAP),
                    Pause(ms(3)),
                    Tap(b, TAP),
                    Pause(ms(20)),
                    Hold(a),
                    Pause(ms(1)),
                    Hold(b),
                ],
                DiagonalRunVariant::V4 => vec![Chord(a, b, TAP), Pause(ms(20)), Hold(a), Hold(b)],
            },
            _ => Vec::new(),
        };
        steps.push(Sustain(self.duration));
        steps
    }
}

/// Direction set, gait and hold time for one displacement, without touching
/// any keys.
pub fn plan_command(
    gait: &GaitSpeedModel,
    resolver: &DirectionResolver,
    config: &MotionConfig,
    origin: Point,
    destination: Point,
    speed_pct: f64,
    target: TargetKind,
) -> Option<MotionCommand> {
    let dx = f64::from(destination.x - origin.x);
    let dy = f64::from(destination.y - origin.y);
    let distance = dx.hypot(dy);
    if distance < config.min_move_distance {
        return None;
    }
    let (directions, class) = match resolver.resolve(dx, dy) {
        Resolution::Arrived => return None,
        Resolution::Move { set, class } => (set, class),
    };
    let duration = gait.move_duration(distance, class, speed_pct);
    if duration.is_zero() {
        return None;
    }

    let run_from = match target {
        TargetKind::Waypoint => config.waypoint_run_distance,
        TargetKind::Monster | TargetKind::Boss => config.combat_run_distance,
    };
    let mode = if distance >= run_from { Gait::Run } else { Gait::Walk };
    let run_variant = (mode == Gait::Run && directions.is_diagonal()).then(|| {
        config.diagonal_variant.unwrap_or_else(|| {
            select_diagonal_variant(
                dx,
                dy,
                distance,
                config.near_diagonal_tolerance,
                config.short_hop_distance,
            )
        })
    });

    Some(MotionCommand {
        directions,
        class,
        distance,
        duration,
        gait: mode,
        run_variant,
    })
}

bitflags! {
    /// Direction keys currently down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeldKeys: u8 {
        const LEFT = 1;
        const UP = 1 << 1;
        const RIGHT = 1 << 2;
        const DOWN = 1 << 3;
    }
}

impl From<DirectionKey> for HeldKeys {
    fn from(key: DirectionKey) -> Self {
        match key {
            DirectionKey::Left => HeldKeys::LEFT,
            DirectionKey::Up => HeldKeys::UP,
            DirectionKey::Right => HeldKeys::RIGHT,
            DirectionKey::Down => HeldKeys::DOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    Idle,
    Planning,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl MotionState {
    fn can_become(self, next: MotionState) -> bool {
        use MotionState::*;
        matches!(
            (self, next),
            (Idle, Planning)
                | (Planning, Executing)
                | (Planning, Idle)
                | (Executing, Completed)
                | (Executing, Cancelled)
                | (Executing, Failed)
                | (Completed, Idle)
                | (Cancelled, Idle)
                | (Failed, Idle)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionOutcome {
    Completed,
    Cancelled,
    Failed(ErrorKind),
}

pub struct MotionPlanner {
    input: Box<dyn InputSink>,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    gait: GaitSpeedModel,
    resolver: DirectionResolver,
    config: MotionConfig,
    slice: Duration,
    held: HeldKeys,
    state: MotionState,
    last_outcome: Option<MotionOutcome>,
}

impl MotionPlanner {
    pub fn new(
        input: Box<dyn InputSink>,
        clock: Arc<dyn Clock>,
        stop: StopSignal,
        config: &CoreConfig,
    ) -> Self {
        Self {
            input,
            clock,
            stop,
            gait: GaitSpeedModel::new(config.gait.clone()),
            resolver: DirectionResolver::new(config.motion.min_move_distance),
            config: config.motion.clone(),
            slice: config.stop_slice(),
            held: HeldKeys::empty(),
            state: MotionState::Idle,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<MotionOutcome> {
        self.last_outcome
    }

    pub fn held(&self) -> HeldKeys {
        self.held
    }

    pub fn is_any_held(&self) -> bool {
        !self.held.is_empty()
    }

    pub fn gait_model(&self) -> &GaitSpeedModel {
        &self.gait
    }

    /// Pure planning step. `None` when the destination is already within the
    /// minimum move distance.
    pub fn plan(
        &self,
        origin: Point,
        destination: Point,
        speed_pct: f64,
        target: TargetKind,
    ) -> Option<MotionCommand> {
        plan_command(&self.gait, &self.resolver, &self.config, origin, destination, speed_pct, target)
    }

    /// Plans and executes in one go. Returns the command that ran, if any.
    pub fn move_to(
        &mut self,
        origin: Point,
        destination: Point,
        speed_pct: f64,
        target: TargetKind,
    ) -> Result<Option<MotionCommand>> {
        self.transition(MotionState::Planning)?;
        let Some(command) = self.plan(origin, destination, speed_pct, target) else {
            debug!(?origin, ?destination, "already at destination");
            self.transition(MotionState::Idle)?;
            return Ok(None);
        };
        self.run(&command)?;
        Ok(Some(command))
    }

    pub fn execute(&mut self, command: &MotionCommand) -> Result<()> {
        self.transition(MotionState::Planning)?;
        if let Err(e) = command.validate() {
            self.transition(MotionState::Idle)?;
            return Err(e);
        }
        self.run(command)
    }

    fn run(&mut self, command: &MotionCommand) -> Result<()> {
        self.transition(MotionState::Executing)?;
        debug!(
            directions = ?command.directions,
            gait = ?command.gait,
            variant = ?command.run_variant,
            duration_ms = command.duration.as_millis() as u64,
            "executing motion"
        );

        // one motion in flight: clear anything left over first
        let result = self.stop_all().and_then(|_| self.perform(command));
        let released = self.stop_all();

        let outcome = match (&result, &released) {
            (Err(CoreError::Cancelled), _) => MotionOutcome::Cancelled,
            (Err(e), _) | (Ok(()), Err(e)) => MotionOutcome::Failed(e.kind()),
            (Ok(()), Ok(())) => MotionOutcome::Completed,
        };
        let terminal = match outcome {
            MotionOutcome::Completed => MotionState::Completed,
            MotionOutcome::Cancelled => MotionState::Cancelled,
            MotionOutcome::Failed(kind) => {
                warn!(?kind, "motion failed");
                MotionState::Failed
            }
        };
        self.transition(terminal)?;
        self.last_outcome = Some(outcome);
        self.transition(MotionState::Idle)?;
        result.and(released)
    }

    fn perform(&mut self, command: &MotionCommand) -> Result<()> {
        for step in command.choreography() {
            match step {
                Step::Tap(key, hold) => self.input.press_and_release(key.into(), hold)?,
                Step::Chord(a, b, hold) => {
                    self.press(a)?;
                    self.press(b)?;
                    self.clock.sleep(hold);
                    self.release(a)?;
                    self.release(b)?;
                }
                Step::Hold(key) => self.press(key)?,
                Step::Pause(pause) => self.clock.sleep(pause),
                Step::Sustain(duration) => {
                    wait(self.clock.as_ref(), &self.stop, duration, self.slice)?
                }
            }
            self.stop.check()?;
        }
        Ok(())
    }

    fn press(&mut self, key: DirectionKey) -> Result<()> {
        self.input.hold_key(key.into())?;
        self.held.insert(key.into());
        Ok(())
    }

    fn release(&mut self, key: DirectionKey) -> Result<()> {
        self.input.release_key(key.into())?;
        self.held.remove(key.into());
        Ok(())
    }

    /// Releases all four direction keys, held or not. Keeps going after a
    /// failed release and reports the first error.
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for key in DirectionKey::ALL {
            if let Err(e) = self.release(key) {
                warn!(?key, error = %e, "release failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Presses a non-direction key. Direction keys only move through motions.
    pub fn tap(&mut self, key: Key, hold: Duration) -> Result<()> {
        if key.is_direction() {
            return Err(CoreError::InvariantViolation(format!(
                "{key:?} must go through a motion command"
            )));
        }
        self.input.press_and_release(key, hold)
    }

    /// Brief press to turn the agent towards `key` without moving it far.
    pub fn face(&mut self, key: DirectionKey) -> Result<()> {
        let result = self
            .input
            .press_and_release(key.into(), secs(self.config.facing_secs));
        if result.is_err() {
            self.stop_all()?;
        }
        result
    }

    pub fn click(&mut self, at: Point, button: MouseButton) -> Result<()> {
        self.input.click_at(at.x, at.y, button)
    }

    fn transition(&mut self, next: MotionState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(CoreError::InvariantViolation(format!(
                "motion state {:?} -> {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InputEvent, ManualClock, RecordingInput};

    fn planner() -> (MotionPlanner, RecordingInput, Arc<ManualClock>, StopSignal) {
        planner_with(CoreConfig::default())
    }

    fn planner_with(config: CoreConfig) -> (MotionPlanner, RecordingInput, Arc<ManualClock>, StopSignal) {
        let clock = ManualClock::shared();
        let input = RecordingInput::new(clock.clone());
        let stop = StopSignal::new();
        let planner = MotionPlanner::new(Box::new(input.clone()), clock.clone(), stop.clone(), &config);
        (planner, input, clock, stop)
    }

    fn command(directions: DirectionSet, gait: Gait, variant: Option<DiagonalRunVariant>) -> MotionCommand {
        MotionCommand {
            directions,
            class: directions.class(),
            distance: 200.0,
            duration: Duration::from_millis(300),
            gait,
            run_variant: variant,
        }
    }

    #[test]
    fn test_no_motion_below_minimum() {
        let (planner, ..) = planner();
        let p = Point::new(400, 300);
        for kind in [TargetKind::Waypoint, TargetKind::Monster, TargetKind::Boss] {
            assert!(planner.plan(p, p, 100.0, kind).is_none());
            assert!(planner.plan(p, Point::new(420, 310), 37.0, kind).is_none());
        }
    }

    #[test]
    fn test_run_thresholds_depend_on_target() {
        let (planner, ..) = planner();
        let origin = Point::new(100, 300);
        let dest = Point::new(200, 300);

        let monster = planner.plan(origin, dest, 100.0, TargetKind::Monster).unwrap();
        assert_eq!(monster.gait, Gait::Run);
        let waypoint = planner.plan(origin, dest, 100.0, TargetKind::Waypoint).unwrap();
        assert_eq!(waypoint.gait, Gait::Walk);

        let far = planner.plan(origin, Point::new(250, 300), 100.0, TargetKind::Waypoint).unwrap();
        assert_eq!(far.gait, Gait::Run);
        assert_eq!(far.directions, DirectionSet::E);
        assert_eq!(far.run_variant, None);
    }

    #[test]
    fn test_diagonal_run_gets_variant() {
        let (planner, ..) = planner();
        let cmd = planner
            .plan(Point::new(0, 0), Point::new(200, 200), 100.0, TargetKind::Boss)
            .unwrap();
        assert_eq!(cmd.directions, DirectionSet::SE);
        assert_eq!(cmd.run_variant, Some(DiagonalRunVariant::V2));
        assert!(cmd.validate().is_ok());

        let mut config = CoreConfig::default();
        config.motion.diagonal_variant = Some(DiagonalRunVariant::V4);
        let (pinned, ..) = planner_with(config);
        let cmd = pinned
            .plan(Point::new(0, 0), Point::new(200, 200), 100.0, TargetKind::Boss)
            .unwrap();
        assert_eq!(cmd.run_variant, Some(DiagonalRunVariant::V4));
    }

    #[test]
    fn test_every_choreography_ends_fully_held() {
        let mut commands = Vec::new();
        for set in DirectionSet::SECTORS {
            commands.push(command(set, Gait::Walk, None));
            if set.is_diagonal() {
                for v in [
                    DiagonalRunVariant::V1,
                    DiagonalRunVariant::V2,
                    DiagonalRunVariant::V3,
                    DiagonalRunVariant::V4,
                ] {
                    commands.push(command(set, Gait::Run, Some(v)));
                }
            } else {
                commands.push(command(set, Gait::Run, None));
            }
        }

        for cmd in commands {
            let steps = cmd.choreography();
            assert_eq!(steps.last(), Some(&Step::Sustain(cmd.duration)));
            let held: Vec<DirectionKey> = steps
                .iter()
                .filter_map(|s| match s {
                    Step::Hold(k) => Some(*k),
                    _ => None,
                })
                .collect();
            let mut expected = cmd.directions.keys().to_vec();
            let mut got = held.clone();
            expected.sort_by_key(|k| k.vk_code());
            got.sort_by_key(|k| k.vk_code());
            assert_eq!(got, expected, "{cmd:?}");
        }
    }

    #[test]
    fn test_single_key_run_is_double_tap() {
        let (mut planner, input, clock, _) = planner();
        planner.execute(&command(DirectionSet::W, Gait::Run, None)).unwrap();

        let left = Key::Direction(DirectionKey::Left);
        let events = input.events();
        let tap = events
            .iter()
            .position(|e| matches!(e, InputEvent::Press { key, .. } if *key == left))
            .unwrap();
        let down = events
            .iter()
            .position(|e| matches!(e, InputEvent::Down { key, .. } if *key == left))
            .unwrap();
        assert!(tap < down);
        // 10 ms tap + 10 ms gap + 300 ms hold
        assert_eq!(clock.now(), Duration::from_millis(320));
        assert!(input.held().is_empty());
        assert!(!planner.is_any_held());
        assert_eq!(planner.last_outcome(), Some(MotionOutcome::Completed));
        assert_eq!(planner.state(), MotionState::Idle);
    }

    #[test]
    fn test_v2_adds_second_key_without_tap() {
        let (mut planner, input, ..) = planner();
        planner
            .execute(&command(DirectionSet::NE, Gait::Run, Some(DiagonalRunVariant::V2)))
            .unwrap();
        let presses = input.presses();
        assert_eq!(presses, vec![Key::Direction(DirectionKey::Right)]);
        assert!(input.held().is_empty());
    }

    #[test]
    fn test_stop_all_is_complete_and_idempotent() {
        let (mut planner, input, ..) = planner();
        planner
            .execute(&command(DirectionSet::SW, Gait::Walk, None))
            .unwrap();
        planner.stop_all().unwrap();
        planner.stop_all().unwrap();
        assert!(!planner.is_any_held());
        assert!(input.held().is_empty());

        let releases = input
            .events()
            .iter()
            .rev()
            .take(4)
            .filter(|e| matches!(e, InputEvent::Up { .. }))
            .count();
        assert_eq!(releases, 4);
    }

    #[test]
    fn test_cancel_mid_motion_releases_everything() {
        let (mut planner, input, clock, stop) = planner();
        clock.stop_at(Duration::from_millis(250), stop.clone());
        let mut cmd = command(DirectionSet::SE, Gait::Walk, None);
        cmd.duration = Duration::from_secs(2);

        let err = planner.execute(&cmd).unwrap_err();
        assert_eq!(err, CoreError::Cancelled);
        assert_eq!(planner.last_outcome(), Some(MotionOutcome::Cancelled));
        assert!(!planner.is_any_held());
        assert!(input.held().is_empty());
        assert!(clock.now() <= Duration::from_millis(450));
    }

    #[test]
    fn test_injection_failure_still_releases() {
        let (mut planner, input, ..) = planner();
        input.fail_on(Key::Direction(DirectionKey::Down));
        let err = planner
            .execute(&command(DirectionSet::SE, Gait::Walk, None))
            .unwrap_err();
        assert!(matches!(err, CoreError::InputInjection(_)));
        assert_eq!(
            planner.last_outcome(),
            Some(MotionOutcome::Failed(ErrorKind::InputInjection))
        );
        assert!(!planner.is_any_held());
        assert!(input.held().is_empty());
    }

    #[test]
    fn test_invalid_command_rejected() {
        let (mut planner, input, ..) = planner();
        let bad = command(DirectionSet::E, Gait::Run, Some(DiagonalRunVariant::V1));
        let err = planner.execute(&bad).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
        assert!(input.events().is_empty());
        assert_eq!(planner.state(), MotionState::Idle);
    }

    #[test]
    fn test_tap_refuses_direction_keys() {
        let (mut planner, input, ..) = planner();
        let err = planner
            .tap(Key::Direction(DirectionKey::Up), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
        planner.tap(Key::Attack, Duration::from_millis(20)).unwrap();
        assert_eq!(input.presses(), vec![Key::Attack]);
    }

    #[test]
    fn test_move_to_executes_plan() {
        let (mut planner, input, clock, _) = planner();
        let cmd = planner
            .move_to(Point::new(100, 300), Point::new(200, 300), 100.0, TargetKind::Waypoint)
            .unwrap()
            .unwrap();
        assert_eq!(cmd.gait, Gait::Walk);
        assert_eq!(clock.now(), cmd.duration);
        assert!(input.held().is_empty());

        let none = planner
            .move_to(Point::new(100, 300), Point::new(110, 300), 100.0, TargetKind::Waypoint)
            .unwrap();
        assert!(none.is_none());
        assert_eq!(planner.state(), MotionState::Idle);
    }
}
