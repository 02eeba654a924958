//! Per-tick status for callers that log or display progress

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind, Result};
use crate::types::{ActionTaken, MacroState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub latency_ms: u64,
    pub budget_ms: u64,
    pub over_budget: bool,
}

/// Check if a stage is over budget
pub fn check_stage_timing(stage: &str, latency: Duration, budget_ms: u64) -> StageTiming {
    let latency_ms = latency.as_millis() as u64;
    StageTiming {
        stage: stage.to_string(),
        latency_ms,
        budget_ms,
        over_budget: latency_ms > budget_ms,
    }
}

/// Everything the loop knows about one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub macro_state: Option<MacroState>,
    pub action: Option<ActionTaken>,
    pub last_error: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub speed_pct: f64,
    pub timings: Vec<StageTiming>,
}

impl TickReport {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            macro_state: None,
            action: None,
            last_error: None,
            error_message: None,
            speed_pct: 100.0,
            timings: Vec::new(),
        }
    }

    pub fn record_error(&mut self, error: &CoreError) {
        self.last_error = Some(error.kind());
        self.error_message = Some(error.to_string());
    }

    pub fn over_budget(&self) -> impl Iterator<Item = &StageTiming> {
        self.timings.iter().filter(|t| t.over_budget)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Config(e.to_string()))
    }
}
