//! Deadline monitoring inside job callbacks.
//!
//! The monitor is the body of every job's timer callback. It runs on the
//! dispatch thread and touches only atomics, never the table lock, so a slow
//! table operation cannot delay other jobs' invocations.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::metrics::{JobRuntime, SchedulerMetrics};
use crate::table::JobSpec;
use crate::timer::TimerCallback;
use crate::workload::Workload;

/// Outcome of one monitored invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    /// Start time on the scheduler clock.
    pub started_at: Duration,
    /// Measured execution time.
    pub duration: Duration,
    /// Whether `duration` exceeded the job's deadline.
    pub missed_deadline: bool,
}

/// Measures one job's invocations against its deadline.
#[derive(Debug)]
pub struct DeadlineMonitor {
    job: JobSpec,
    runtime: Arc<JobRuntime>,
    metrics: Arc<SchedulerMetrics>,
    clock: Arc<dyn Clock>,
    workload: Arc<dyn Workload>,
}

impl DeadlineMonitor {
    /// Create a monitor for `job`.
    #[must_use]
    pub fn new(
        job: JobSpec,
        runtime: Arc<JobRuntime>,
        metrics: Arc<SchedulerMetrics>,
        clock: Arc<dyn Clock>,
        workload: Arc<dyn Workload>,
    ) -> Self {
        Self {
            job,
            runtime,
            metrics,
            clock,
            workload,
        }
    }

    /// Run and measure one invocation.
    pub fn on_tick(&self) -> Invocation {
        let started_at = self.clock.now();
        self.workload.execute(&self.job);
        let duration = self.clock.now().saturating_sub(started_at);

        self.metrics.record_execution(duration);

        let missed_deadline = duration > self.job.deadline;
        if missed_deadline {
            self.metrics.inc_missed_deadline();
            warn!(
                job = %self.job.name,
                duration_us = duration.as_micros(),
                deadline_ms = self.job.deadline.as_millis(),
                "Missed deadline"
            );
        }
        self.runtime.record_invocation(started_at, missed_deadline);

        Invocation {
            started_at,
            duration,
            missed_deadline,
        }
    }

    /// Turn the monitor into a timer callback.
    #[must_use]
    pub fn into_callback(self) -> TimerCallback {
        Box::new(move || {
            self.on_tick();
        })
    }
}
