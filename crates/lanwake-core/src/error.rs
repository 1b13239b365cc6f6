//! Error taxonomy shared by every LanWake crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanWakeError {
    /// Unknown machine, group or task id.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// Malformed address fields, bad cron/scheduled_time combination, etc.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single probe attempt failed. Retried by the probe loop, never surfaced.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The wake signal could not be transmitted.
    #[error("Wake signal send failed: {0}")]
    SignalSend(String),

    /// One scheduled task failed to fire.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LanWakeError {
    pub fn machine_not_found(id: i64) -> Self {
        LanWakeError::NotFound { kind: "Machine", id }
    }

    pub fn group_not_found(id: i64) -> Self {
        LanWakeError::NotFound { kind: "Group", id }
    }

    pub fn task_not_found(id: i64) -> Self {
        LanWakeError::NotFound { kind: "Scheduled task", id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LanWakeError::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LanWakeError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, LanWakeError>;
