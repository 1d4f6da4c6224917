//! Timer activation with bounded retries.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ActivationError, TimerError};
use crate::timer::{TimerHandle, TimerService};

/// Retry policy for starting a job's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Start attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// Timeout passed to each `start` call.
    pub start_timeout: Duration,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            start_timeout: Duration::from_millis(100),
        }
    }
}

/// Starts timers, retrying with a fixed delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryableActivator {
    config: ActivationConfig,
}

impl RetryableActivator {
    /// Create an activator with the given policy.
    #[must_use]
    pub fn new(config: ActivationConfig) -> Self {
        Self { config }
    }

    /// Retry policy.
    #[must_use]
    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    /// Start `timer`, retrying up to the configured number of attempts.
    ///
    /// Returns the number of attempts the successful start took.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError`] with the last failure once every attempt failed.
    pub fn start<S>(&self, timers: &S, timer: TimerHandle) -> Result<u32, ActivationError>
    where
        S: TimerService + ?Sized,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last = TimerError::Timeout;

        for attempt in 1..=attempts {
            match timers.start(timer, self.config.start_timeout) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(%timer, attempt, "Timer started after retry");
                    }
                    return Ok(attempt);
                }
                Err(err) => {
                    last = err;
                    if attempt < attempts {
                        warn!(%timer, attempt, error = %last, "Timer start failed, retrying");
                        if !self.config.retry_delay.is_zero() {
                            thread::sleep(self.config.retry_delay);
                        }
                    }
                }
            }
        }

        warn!(%timer, attempts, error = %last, "Timer start failed, giving up");
        Err(ActivationError { attempts, last })
    }
}
