use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed or normalised.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The descriptor's scheduler fields could not be read.
    #[error("Schedule config error: {0}")]
    Config(String),

    /// The trigger dispatcher refused an operation.
    #[error("Dispatcher error: {0}")]
    Dispatcher(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Config(_) => "CONFIG_ERROR",
            SchedulerError::Dispatcher(_) => "DISPATCHER_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
