//! Prelude module for common scheduler types.
//!
//! This module provides a convenient way to import the most commonly used
//! types from the scheduler crate.

pub use crate::activator::ActivationConfig;
pub use crate::adaptive::{AdaptiveConfig, AdaptiveController, ControlOutcome, LoadFactor};
pub use crate::config::SchedulerConfig;
pub use crate::error::{SchedulerError, SchedulerResult, TimerError};
pub use crate::load::{DispatcherLoadEstimator, FixedLoad, LoadEstimator, ScriptedLoad};
pub use crate::metrics::SystemMetrics;
pub use crate::scheduler::Scheduler;
pub use crate::table::{JobHandle, JobSnapshot, JobSpec};
pub use crate::timer::{DispatchTimerService, ManualTimerService, TimerService};
pub use crate::workload::{IdleWorkload, SimulatedWorkload, Workload};
