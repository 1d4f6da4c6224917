//! Error types for the scheduler crate.
//!
//! Failures are split by concern: [`TimerError`] for the timer service
//! boundary, [`ActivationError`] for exhausted start retries, and
//! [`SchedulerError`] for everything surfaced to callers of the scheduler.
//! Deadline misses are not errors; they only show up in the metrics.

use std::time::Duration;

use thiserror::Error;

use crate::table::JobHandle;

/// Errors reported by a [`TimerService`](crate::timer::TimerService).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The command was not accepted or answered within its timeout.
    #[error("Timer command timed out")]
    Timeout,

    /// The handle does not refer to a live timer.
    #[error("Unknown timer")]
    UnknownTimer,

    /// The service has shut down and accepts no more commands.
    #[error("Timer service stopped")]
    ServiceStopped,

    /// The period was zero or too long to schedule.
    #[error("Timer period must be greater than zero and representable as a deadline")]
    InvalidPeriod,

    /// The service refused the operation.
    #[error("Timer operation rejected: {0}")]
    Rejected(String),
}

impl TimerError {
    /// Create a rejected error.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// A timer could not be started after every configured attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Timer start failed after {attempts} attempt(s): {last}")]
pub struct ActivationError {
    /// Number of start attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last: TimerError,
}

/// Errors returned by [`Scheduler`](crate::scheduler::Scheduler) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The job table lock was not acquired within the configured budget.
    #[error("Job table lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Every slot of the job table is in use.
    #[error("Job pool exhausted: all {capacity} slots are active")]
    PoolExhausted {
        /// Fixed table capacity.
        capacity: usize,
    },

    /// A job was registered with a zero period.
    #[error("Job period must be greater than zero")]
    InvalidPeriod,

    /// The backing timer could not be created. The job stays registered but unarmed.
    #[error("Timer for job {handle} could not be created: {source}")]
    TimerCreationFailed {
        /// Handle of the registered, unarmed job.
        handle: JobHandle,
        /// Underlying timer service error.
        source: TimerError,
    },

    /// The backing timer could not be started. The job stays registered but unarmed.
    #[error("Timer for job {handle} could not be started: {source}")]
    ActivationFailed {
        /// Handle of the registered, unarmed job.
        handle: JobHandle,
        /// Retry outcome.
        source: ActivationError,
    },

    /// The handle is stale or was never issued.
    #[error("Unknown job: {0}")]
    UnknownJob(JobHandle),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SchedulerError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_) | Self::TimerCreationFailed { .. } | Self::ActivationFailed { .. }
        )
    }

    /// Handle of the job left registered by a timer failure, if any.
    #[must_use]
    pub fn job_handle(&self) -> Option<JobHandle> {
        match self {
            Self::TimerCreationFailed { handle, .. } | Self::ActivationFailed { handle, .. } => {
                Some(*handle)
            }
            Self::UnknownJob(handle) => Some(*handle),
            _ => None,
        }
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Result type for timer service operations.
pub type TimerResult<T> = std::result::Result<T, TimerError>;
