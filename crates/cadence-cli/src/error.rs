//! Error types for the cadence CLI

use cadence_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Scheduler(SchedulerError::InvalidConfiguration(_))
            | CliError::InvalidConfiguration(_)
            | CliError::JsonError(_) => 4,
            CliError::Scheduler(SchedulerError::LockTimeout(_)) => 5,
            CliError::Scheduler(_) => 3,
            CliError::IoError(_) => 1,
        }
    }
}
