//! Units of work run by job callbacks.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::table::JobSpec;

/// Work performed on every invocation of a job.
pub trait Workload: Send + Sync + fmt::Debug {
    /// Run one invocation of `job`.
    fn execute(&self, job: &JobSpec);
}

/// Sleeps for a duration proportional to the job's priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedWorkload {
    /// Work time at priority zero.
    pub base: Duration,
    /// Additional work time per priority level.
    pub per_priority: Duration,
}

impl Default for SimulatedWorkload {
    fn default() -> Self {
        Self {
            base: Duration::from_micros(1000),
            per_priority: Duration::from_micros(500),
        }
    }
}

impl SimulatedWorkload {
    /// Work time for a job of the given priority.
    #[must_use]
    pub fn work_for(&self, priority: u8) -> Duration {
        self.base
            .saturating_add(self.per_priority.saturating_mul(u32::from(priority)))
    }
}

impl Workload for SimulatedWorkload {
    fn execute(&self, job: &JobSpec) {
        let work = self.work_for(job.priority);
        if !work.is_zero() {
            thread::sleep(work);
        }
    }
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleWorkload;

impl Workload for IdleWorkload {
    fn execute(&self, _job: &JobSpec) {}
}

/// Adapts a closure into a [`Workload`].
pub struct FnWorkload<F> {
    work: F,
}

impl<F> FnWorkload<F>
where
    F: Fn(&JobSpec) + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(work: F) -> Self {
        Self { work }
    }
}

impl<F> Workload for FnWorkload<F>
where
    F: Fn(&JobSpec) + Send + Sync,
{
    fn execute(&self, job: &JobSpec) {
        (self.work)(job);
    }
}

impl<F> fmt::Debug for FnWorkload<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkload").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_simulated_work_scales_with_priority() {
        let workload = SimulatedWorkload::default();
        assert_eq!(workload.work_for(0), Duration::from_micros(1000));
        assert_eq!(workload.work_for(1), Duration::from_micros(1500));
        assert_eq!(workload.work_for(5), Duration::from_micros(3500));
    }

    #[test]
    fn test_fn_workload_runs_closure() {
        let calls = AtomicU32::new(0);
        let workload = FnWorkload::new(|job: &JobSpec| {
            assert_eq!(job.name, "A");
            calls.fetch_add(1, Ordering::SeqCst);
        });

        let job = JobSpec::from_millis("A", 500, 1, 200);
        workload.execute(&job);
        workload.execute(&job);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
