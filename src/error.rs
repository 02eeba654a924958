//! Error taxonomy for the decision core

use serde::{Deserialize, Serialize};

/// Errors raised by the core and by its external collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Target, agent or frame missing this tick. Always recoverable.
    #[error("perception miss: {0}")]
    PerceptionMiss(String),

    /// A key or mouse primitive was rejected by the injection layer.
    #[error("input injection failed: {0}")]
    InputInjection(String),

    /// Speed read-out could not be captured or parsed.
    #[error("speed calibration failed: {0}")]
    Calibration(String),

    /// Programming error, e.g. a diagonal with opposing keys.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The external stop signal was raised during a wait.
    #[error("stop requested")]
    Cancelled,

    /// Configuration or routing data could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Serialisable tag of a [`CoreError`], exposed in status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PerceptionMiss,
    InputInjection,
    Calibration,
    InvariantViolation,
    Cancelled,
    Config,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::PerceptionMiss(_) => ErrorKind::PerceptionMiss,
            CoreError::InputInjection(_) => ErrorKind::InputInjection,
            CoreError::Calibration(_) => ErrorKind::Calibration,
            CoreError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Config(_) => ErrorKind::Config,
        }
    }
}

impl ErrorKind {
    /// Whether the control loop may keep running after this error.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::PerceptionMiss | ErrorKind::InputInjection | ErrorKind::Calibration
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
