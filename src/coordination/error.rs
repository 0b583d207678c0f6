use thiserror::Error;

/// Failure of a coordination store call or bridge operation
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid store path `{0}`")]
    InvalidPath(String),
    #[error("No record at `{0}`")]
    NotFound(String),
    #[error("Group {0} is not registered")]
    NotRegistered(String),
    #[error("Failed to encode or decode job record: {0}")]
    Serialization(#[from] serde_yaml::Error),
    #[error("Scheduling failed: {0}")]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression `{expr}`: {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("Job {0} is not scheduled")]
    NotScheduled(String),
}
