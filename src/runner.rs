//! Observe, arbitrate, report
//!
//! The loop is synchronous and single-threaded. Each error kind has one
//! fixed recovery; only `InvariantViolation` and `Config` end a run with an
//! error.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::arbiter::{ArbiterContext, PriorityArbiter};
use crate::config::{secs, CoreConfig, RunnerConfig};
use crate::error::{CoreError, ErrorKind, Result};
use crate::perception::Observation;
use crate::status::TickReport;
use crate::types::{ActionTaken, RoomState};

/// What the loop does after a failed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Skip the tick and sleep the perception back-off.
    Backoff,
    /// Release every direction key, then carry on.
    Release,
    Continue,
    /// Leave the loop cleanly.
    Exit,
    Abort,
}

impl Recovery {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::PerceptionMiss => Recovery::Backoff,
            ErrorKind::InputInjection => Recovery::Release,
            ErrorKind::Calibration => Recovery::Continue,
            ErrorKind::Cancelled => Recovery::Exit,
            ErrorKind::InvariantViolation | ErrorKind::Config => Recovery::Abort,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub characters_completed: u32,
    pub cancelled: bool,
}

pub struct Agent {
    pub ctx: ArbiterContext,
    pub arbiter: PriorityArbiter,
    config: RunnerConfig,
    tick: u64,
}

impl Agent {
    pub fn new(ctx: ArbiterContext, arbiter: PriorityArbiter, config: &CoreConfig) -> Self {
        Self {
            ctx,
            arbiter,
            config: config.runner.clone(),
            tick: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// One observe → arbitrate pass. `room` supplies map and door state for
    /// the observation. Recoverable failures come back as a report with
    /// `last_error` set; `Err` means the loop must end.
    pub fn step<R>(&mut self, room: &mut R) -> Result<TickReport>
    where
        R: FnMut(&Observation) -> RoomState,
    {
        self.tick += 1;
        let mut report = TickReport::new(self.tick);

        let result = self.ctx.perception.observe().and_then(|obs| {
            report.macro_state = Some(obs.macro_state());
            report.timings = obs.timings.clone();
            let state = room(&obs);
            self.arbiter.tick(&mut self.ctx, &obs, &state)
        });
        report.speed_pct = self.arbiter.speed_pct();

        match result {
            Ok(action) => {
                for t in report.over_budget() {
                    warn!(stage = %t.stage, latency_ms = t.latency_ms, budget_ms = t.budget_ms, "stage over budget");
                }
                debug!(tick = self.tick, ?action, "tick");
                report.action = Some(action);
                Ok(report)
            }
            Err(e) => self.recover(report, e),
        }
    }

    fn recover(&mut self, mut report: TickReport, err: CoreError) -> Result<TickReport> {
        report.record_error(&err);
        match Recovery::for_kind(err.kind()) {
            Recovery::Backoff => {
                debug!(error = %err, "perception miss, backing off");
                self.ctx.wait(secs(self.config.perception_backoff_secs))?;
            }
            Recovery::Release => {
                warn!(error = %err, "input rejected, releasing keys");
                self.release_all();
            }
            Recovery::Continue => {
                warn!(error = %err, "tick failed, continuing");
            }
            Recovery::Exit => {
                info!("stop requested");
                self.release_all();
                return Err(err);
            }
            Recovery::Abort => {
                error!(error = %err, tick = self.tick, "aborting run");
                self.release_all();
                return Err(err);
            }
        }
        Ok(report)
    }

    fn release_all(&mut self) {
        if let Err(e) = self.ctx.planner.stop_all() {
            warn!(error = %e, "could not release direction keys");
        }
    }

    /// Runs until every configured character is done, the stop signal is
    /// raised or an unrecoverable error occurs.
    pub fn run<R, F>(&mut self, mut room: R, mut on_report: F) -> Result<RunSummary>
    where
        R: FnMut(&Observation) -> RoomState,
        F: FnMut(&TickReport),
    {
        let total = self.config.total_characters.max(1);
        let mut summary = RunSummary::default();
        info!(total, "run started");

        loop {
            let report = match self.step(&mut room) {
                Ok(report) => report,
                Err(CoreError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            summary.ticks = self.tick;
            on_report(&report);

            if report.action == Some(ActionTaken::RequestCharacterSwitch) {
                summary.characters_completed += 1;
                info!(done = summary.characters_completed, total, "character finished");
                if summary.characters_completed >= total {
                    break;
                }
                self.arbiter.on_character_switch();
            }
        }
        summary.ticks = self.tick;
        info!(?summary, "run finished");
        Ok(summary)
    }
}
