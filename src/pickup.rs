//! Loot pickup and the retry-or-switch decision
//!
//! A pickup marker is only trusted once it has been on screen continuously
//! for `confirm_secs` inside a `window_secs` observation window. Single-frame
//! hits are common on busy screens.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::arbiter::ArbiterContext;
use crate::config::{secs, PickupConfig};
use crate::detection::region_is_grey;
use crate::error::{CoreError, Result};
use crate::input::Key;
use crate::types::{ActionTaken, Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    Confirmed,
    Rejected,
}

/// Pure presence debouncer fed with timestamped samples.
#[derive(Debug, Clone)]
pub struct PickupDebouncer {
    confirm: Duration,
    window: Duration,
    window_start: Option<Duration>,
    run_start: Option<Duration>,
}

impl PickupDebouncer {
    pub fn new(confirm: Duration, window: Duration) -> Self {
        Self {
            confirm,
            window,
            window_start: None,
            run_start: None,
        }
    }

    pub fn from_config(config: &PickupConfig) -> Self {
        Self::new(secs(config.confirm_secs), secs(config.window_secs))
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.run_start = None;
    }

    pub fn observe(&mut self, at: Duration, present: bool) -> Verdict {
        let window_start = *self.window_start.get_or_insert(at);
        if present {
            let run_start = *self.run_start.get_or_insert(at);
            if at.saturating_sub(run_start) >= self.confirm {
                return Verdict::Confirmed;
            }
        } else {
            self.run_start = None;
        }
        if at.saturating_sub(window_start) >= self.window {
            Verdict::Rejected
        } else {
            Verdict::Pending
        }
    }
}

pub struct PickupRoutine {
    config: PickupConfig,
    debouncer: PickupDebouncer,
}

impl PickupRoutine {
    pub fn new(config: &PickupConfig) -> Self {
        Self {
            config: config.clone(),
            debouncer: PickupDebouncer::from_config(config),
        }
    }

    /// Polls perception until the marker is confirmed or the window closes.
    /// The tick that spotted the marker counts as the first sample.
    pub fn confirm(&mut self, ctx: &mut ArbiterContext) -> Result<bool> {
        self.debouncer.reset();
        let poll = secs(self.config.poll_secs);
        let mut present = true;
        loop {
            match self.debouncer.observe(ctx.clock.now(), present) {
                Verdict::Confirmed => return Ok(true),
                Verdict::Rejected => return Ok(false),
                Verdict::Pending => {}
            }
            ctx.wait(poll)?;
            present = match ctx.perception.observe() {
                Ok(obs) => obs.has(Label::PickupMarker),
                Err(CoreError::PerceptionMiss(msg)) => {
                    debug!(%msg, "pickup poll missed a frame");
                    false
                }
                Err(e) => return Err(e),
            };
        }
    }

    /// Gather, collect, then decide between replaying the instance and
    /// switching character.
    pub fn run(&mut self, ctx: &mut ArbiterContext) -> Result<ActionTaken> {
        ctx.planner.stop_all()?;
        let press = secs(self.config.key_press_secs);

        ctx.planner.tap(Key::Gather, press)?;
        ctx.wait(secs(self.config.gather_settle_secs))?;

        let collect = secs(self.config.collect_secs);
        let started = ctx.clock.now();
        let mut presses = 0u32;
        while ctx.clock.now().saturating_sub(started) < collect {
            ctx.planner.tap(Key::Attack, secs(self.config.collect_press_secs))?;
            ctx.wait(secs(self.config.collect_gap_secs))?;
            presses += 1;
        }
        debug!(presses, "collection finished");

        let action = if self.retry_available(ctx) {
            ctx.planner.tap(Key::Retry, press)?;
            ActionTaken::RetryInstance
        } else {
            ctx.planner.tap(Key::Exit, press)?;
            ActionTaken::RequestCharacterSwitch
        };
        info!(?action, "pickup complete");
        Ok(action)
    }

    /// Retry button present and coloured. Missing or grey means this
    /// character has no runs left.
    fn retry_available(&self, ctx: &ArbiterContext) -> bool {
        let frame = match ctx.perception.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "no frame for retry check");
                return false;
            }
        };
        let pattern = &ctx.perception.config().retry_pattern;
        let threshold = ctx.perception.config().retry_threshold;
        let hits = match ctx.perception.find_template(&frame, pattern, threshold) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "retry button lookup failed");
                return false;
            }
        };
        let Some(button) = hits.first() else {
            info!("retry button not found");
            return false;
        };
        let grey = region_is_grey(
            &frame,
            button.inset(self.config.retry_padding),
            self.config.grey_max_spread,
            self.config.grey_max_saturation,
        );
        debug!(?button, grey, "retry button");
        !grey
    }
}
