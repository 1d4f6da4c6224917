//! Timer service boundary.
//!
//! A [`TimerService`] owns periodic or one-shot timers and runs their
//! callbacks on a single dispatch context. Every command may fail or time out;
//! callers treat both as recoverable.
//!
//! - [`DispatchTimerService`] runs callbacks on a dedicated thread driven by a
//!   deadline-ordered queue.
//! - [`ManualTimerService`] runs callbacks only when told to, for tests and
//!   simulations.

mod dispatch;
mod manual;

pub use dispatch::{DispatchStats, DispatchTimerService};
pub use manual::ManualTimerService;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TimerResult;

/// Callback run by the timer service each time a timer expires.
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// Opaque reference to a timer owned by a [`TimerService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a raw service-specific identifier.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw service-specific identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Callback dispatch facility the scheduler arms its jobs on.
///
/// Timers are created dormant; `start` arms them. Changing the period of a
/// running timer re-arms its pending expiry at `now + new_period`; a dormant
/// timer only records the new period.
pub trait TimerService: Send + Sync {
    /// Create a dormant timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the period is zero or the service cannot accept the timer.
    fn create(
        &self,
        name: &str,
        period: Duration,
        repeating: bool,
        callback: TimerCallback,
    ) -> TimerResult<TimerHandle>;

    /// Arm a timer to expire one period from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer is unknown or the command times out.
    fn start(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()>;

    /// Disarm a timer without deleting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer is unknown or the command times out.
    fn stop(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()>;

    /// Restart a timer's pending expiry from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer is unknown or the command times out.
    fn reset(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()>;

    /// Replace a timer's period.
    ///
    /// # Errors
    ///
    /// Returns an error if the period is zero, the timer is unknown or the
    /// command times out.
    fn change_period(
        &self,
        timer: TimerHandle,
        new_period: Duration,
        timeout: Duration,
    ) -> TimerResult<()>;

    /// Delete a timer and drop its callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer is unknown or the command times out.
    fn delete(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()>;
}
