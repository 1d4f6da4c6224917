//! # cadence-scheduler
//!
//! Adaptive, deadline-aware periodic job scheduler.
//!
//! A bounded pool of named jobs is armed on a timer service. Each invocation
//! is measured against the job's soft deadline, and a feedback controller
//! rescales every job's period from an estimate of system load.
//!
//! ## Architecture
//!
//! - [`scheduler`] - [`Scheduler`] context: register, unregister, re-arm, snapshots
//! - [`table`] - fixed-capacity job arena with generation-checked handles
//! - [`timer`] - [`TimerService`] boundary, threaded dispatcher and manual service
//! - [`monitor`] - per-invocation deadline monitoring (the job callback body)
//! - [`activator`] - timer start with bounded retries
//! - [`load`] - load estimation from dispatcher utilization
//! - [`adaptive`] - load bands, period factors and the control loop
//! - [`metrics`] - lock-free aggregate and per-job counters
//! - [`clock`] / [`workload`] - time source and unit-of-work seams
//! - [`config`] - serde-backed configuration with validation
//! - [`error`] - error types
//!
//! ## Concurrency
//!
//! Every callback runs on the timer service's single dispatch context and
//! reports through atomics. Registration and the control loop serialize on
//! the table lock, which is always acquired with a bounded wait; a timeout
//! surfaces as [`SchedulerError::LockTimeout`] or a skipped control cycle.
//!
//! ## Example
//!
//! ```rust
//! use cadence_scheduler::prelude::*;
//! use std::sync::Arc;
//!
//! let timers = Arc::new(ManualTimerService::new());
//! let scheduler = Scheduler::new(SchedulerConfig::default(), timers.clone())?
//!     .with_workload(Arc::new(IdleWorkload));
//! let job = scheduler.register("A", 500, 1, 200)?;
//!
//! // Under high load every period grows by 20%.
//! let mut controller = AdaptiveController::new(AdaptiveConfig::default(), FixedLoad(90.0));
//! controller.run_cycle(&scheduler);
//! assert_eq!(scheduler.job(job)?.period, std::time::Duration::from_millis(600));
//! # Ok::<(), SchedulerError>(())
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]

pub mod activator;
pub mod adaptive;
pub mod clock;
pub mod config;
pub mod error;
pub mod load;
pub mod metrics;
pub mod monitor;
pub mod scheduler;
pub mod table;
pub mod timer;
pub mod workload;

pub mod prelude;

pub use activator::{ActivationConfig, RetryableActivator};
pub use adaptive::{
    AdaptiveConfig, AdaptiveController, ControlOutcome, ControllerHandle, LoadBand, LoadFactor,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{DEFAULT_CAPACITY, SchedulerConfig, SchedulerConfigBuilder};
pub use error::{ActivationError, SchedulerError, SchedulerResult, TimerError, TimerResult};
pub use load::{DispatcherLoadEstimator, FixedLoad, LoadEstimator, ScriptedLoad};
pub use metrics::{JobRuntime, SchedulerMetrics, SystemMetrics};
pub use monitor::{DeadlineMonitor, Invocation};
pub use scheduler::Scheduler;
pub use table::{JobHandle, JobSnapshot, JobSpec, MAX_JOB_NAME_LEN};
pub use timer::{
    DispatchStats, DispatchTimerService, ManualTimerService, TimerCallback, TimerHandle,
    TimerService,
};
pub use workload::{FnWorkload, IdleWorkload, SimulatedWorkload, Workload};
