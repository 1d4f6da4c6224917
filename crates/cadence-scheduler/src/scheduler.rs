//! Scheduler context: registration, removal and rescaling of periodic jobs.
//!
//! Structural mutation of the job table happens only under the table lock,
//! acquired with a bounded wait. Job callbacks never take the lock; they
//! report through atomics, so [`Scheduler::snapshot`] never waits.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::activator::RetryableActivator;
use crate::adaptive::{AdaptiveConfig, LoadFactor};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::metrics::{JobRuntime, SchedulerMetrics, SystemMetrics};
use crate::monitor::DeadlineMonitor;
use crate::table::{Job, JobHandle, JobSnapshot, JobSpec, JobTable};
use crate::timer::TimerService;
use crate::workload::Workload;

/// Adaptive, deadline-aware periodic job scheduler.
///
/// Jobs are armed on a [`TimerService`]; every invocation runs the job's
/// [`Workload`] inside a [`DeadlineMonitor`]. An
/// [`AdaptiveController`](crate::adaptive::AdaptiveController) rescales
/// periods through [`rescale_periods`](Self::rescale_periods).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cadence_scheduler::{ManualTimerService, Scheduler, SchedulerConfig};
///
/// let timers = Arc::new(ManualTimerService::new());
/// let scheduler = Scheduler::new(SchedulerConfig::default(), timers.clone())?;
///
/// let handle = scheduler.register("A", 500, 1, 200)?;
/// assert!(scheduler.job(handle)?.armed);
/// assert_eq!(scheduler.snapshot().job_count, 1);
/// # Ok::<(), cadence_scheduler::SchedulerError>(())
/// ```
pub struct Scheduler {
    config: SchedulerConfig,
    table: Mutex<JobTable>,
    metrics: Arc<SchedulerMetrics>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    workload: Arc<dyn Workload>,
    activator: RetryableActivator,
}

impl Scheduler {
    /// Create a scheduler arming its jobs on `timers`.
    ///
    /// Jobs run the configured [`SimulatedWorkload`](crate::workload::SimulatedWorkload)
    /// and are measured with a [`SystemClock`] unless replaced with
    /// [`with_workload`](Self::with_workload) / [`with_clock`](Self::with_clock).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfiguration`] if `config` is invalid.
    pub fn new(config: SchedulerConfig, timers: Arc<dyn TimerService>) -> SchedulerResult<Self> {
        config.validate()?;

        info!(
            capacity = config.capacity,
            lock_timeout_ms = config.lock_timeout.as_millis(),
            "Scheduler created"
        );

        Ok(Self {
            table: Mutex::new(JobTable::new(config.capacity)),
            metrics: Arc::new(SchedulerMetrics::new()),
            timers,
            clock: Arc::new(SystemClock::new()),
            workload: Arc::new(config.workload),
            activator: RetryableActivator::new(config.activation),
            config,
        })
    }

    /// Measure invocations with `clock`. Affects jobs registered afterwards.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `workload` on every invocation. Affects jobs registered afterwards.
    #[must_use]
    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = workload;
        self
    }

    /// Register a job from millisecond values.
    ///
    /// # Errors
    ///
    /// See [`register_job`](Self::register_job).
    pub fn register(
        &self,
        name: &str,
        period_ms: u32,
        priority: u8,
        deadline_ms: u32,
    ) -> SchedulerResult<JobHandle> {
        self.register_job(JobSpec::from_millis(name, period_ms, priority, deadline_ms))
    }

    /// Register a job and arm its timer.
    ///
    /// The job takes the first free slot. If its timer cannot be created or
    /// started, the job stays registered but unarmed; the error carries its
    /// handle so the caller can [`rearm`](Self::rearm) or
    /// [`unregister`](Self::unregister) it.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidPeriod`] for a zero period
    /// - [`SchedulerError::LockTimeout`] if the table lock is busy
    /// - [`SchedulerError::PoolExhausted`] if every slot is in use
    /// - [`SchedulerError::TimerCreationFailed`] / [`SchedulerError::ActivationFailed`]
    pub fn register_job(&self, spec: JobSpec) -> SchedulerResult<JobHandle> {
        if spec.period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }

        let mut table = self.lock_table()?;
        let handle = table
            .allocate(spec, Arc::new(JobRuntime::new()))
            .ok_or(SchedulerError::PoolExhausted {
                capacity: table.capacity(),
            })?;
        self.metrics.set_job_count(table.active_count());

        let job = table
            .get_mut(handle)
            .ok_or(SchedulerError::UnknownJob(handle))?;
        info!(
            job = %job.name(),
            %handle,
            period_ms = job.period().as_millis(),
            deadline_ms = job.spec().deadline.as_millis(),
            priority = job.spec().priority,
            "Job registered"
        );

        self.arm(handle, job)?;
        Ok(handle)
    }

    /// Remove a job, delete its timer and free its slot.
    ///
    /// Returns the job's final snapshot. Every outstanding handle to the
    /// slot becomes stale.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`] if the table lock is busy or
    /// [`SchedulerError::UnknownJob`] for a stale handle.
    pub fn unregister(&self, handle: JobHandle) -> SchedulerResult<JobSnapshot> {
        let mut table = self.lock_table()?;
        let job = table
            .release(handle)
            .ok_or(SchedulerError::UnknownJob(handle))?;
        self.metrics.set_job_count(table.active_count());

        if let Some(timer) = job.timer()
            && let Err(err) = self.timers.delete(timer, self.config.command_timeout)
        {
            warn!(job = %job.name(), %handle, %timer, error = %err, "Timer delete failed");
        }

        info!(job = %job.name(), %handle, "Job unregistered");
        Ok(job.snapshot(handle))
    }

    /// Create and start the timer of a registered but unarmed job.
    ///
    /// Does nothing for a job that is already armed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`], [`SchedulerError::UnknownJob`]
    /// or the timer failure that left the job unarmed.
    pub fn rearm(&self, handle: JobHandle) -> SchedulerResult<()> {
        let mut table = self.lock_table()?;
        let job = table
            .get_mut(handle)
            .ok_or(SchedulerError::UnknownJob(handle))?;
        self.arm(handle, job)
    }

    /// Aggregate metrics. Never waits on the table lock.
    #[must_use]
    pub fn snapshot(&self) -> SystemMetrics {
        self.metrics.snapshot()
    }

    /// Snapshot of one job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`] or [`SchedulerError::UnknownJob`].
    pub fn job(&self, handle: JobHandle) -> SchedulerResult<JobSnapshot> {
        let table = self.lock_table()?;
        table
            .get(handle)
            .map(|job| job.snapshot(handle))
            .ok_or(SchedulerError::UnknownJob(handle))
    }

    /// Snapshots of every registered job in slot order.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`] if the table lock is busy.
    pub fn jobs(&self) -> SchedulerResult<Vec<JobSnapshot>> {
        let table = self.lock_table()?;
        Ok(table
            .iter()
            .map(|(handle, job)| job.snapshot(handle))
            .collect())
    }

    /// Scale every job's period by `factor`, clamped to the bounds in `adaptive`.
    ///
    /// The new period is stored for every job and pushed to the timer of every
    /// job that has one. A failed period change is logged; the stored period
    /// still advances. A unity factor changes nothing.
    ///
    /// Returns the number of jobs whose period changed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`] if the table lock is busy.
    pub fn rescale_periods(
        &self,
        factor: LoadFactor,
        adaptive: &AdaptiveConfig,
    ) -> SchedulerResult<usize> {
        if factor.is_unity() {
            return Ok(0);
        }

        let mut table = self.lock_table()?;
        let mut rescaled = 0;

        for (handle, job) in table.iter_mut() {
            let period = job.period();
            let new_period = adaptive.scaled_period(period, factor);
            if new_period == period {
                continue;
            }

            job.set_period(new_period);
            rescaled += 1;

            if let Some(timer) = job.timer()
                && let Err(err) =
                    self.timers
                        .change_period(timer, new_period, self.config.command_timeout)
            {
                warn!(job = %job.name(), %handle, error = %err, "Timer period change failed");
            }

            debug!(
                job = %job.name(),
                old_period_us = period.as_micros(),
                new_period_us = new_period.as_micros(),
                "Period rescaled"
            );
        }

        Ok(rescaled)
    }

    /// Shared metrics storage.
    #[must_use]
    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Fixed number of job slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn lock_table(&self) -> SchedulerResult<MutexGuard<'_, JobTable>> {
        let timeout = self.config.lock_timeout;
        self.table.try_lock_for(timeout).ok_or_else(|| {
            debug!(timeout_ms = timeout.as_millis(), "Job table lock timed out");
            SchedulerError::LockTimeout(timeout)
        })
    }

    /// Create the job's timer if missing, then start it. Called under the table lock.
    fn arm(&self, handle: JobHandle, job: &mut Job) -> SchedulerResult<()> {
        if job.is_armed() {
            return Ok(());
        }

        let timer = if let Some(timer) = job.timer() {
            timer
        } else {
            let monitor = DeadlineMonitor::new(
                job.spec().clone(),
                Arc::clone(job.runtime()),
                Arc::clone(&self.metrics),
                Arc::clone(&self.clock),
                Arc::clone(&self.workload),
            );
            let timer = self
                .timers
                .create(job.name(), job.period(), true, monitor.into_callback())
                .map_err(|source| {
                    warn!(job = %job.name(), %handle, error = %source, "Timer creation failed");
                    SchedulerError::TimerCreationFailed { handle, source }
                })?;
            job.timer = Some(timer);
            timer
        };

        let attempts = self
            .activator
            .start(&*self.timers, timer)
            .map_err(|source| SchedulerError::ActivationFailed { handle, source })?;
        job.armed = true;

        debug!(job = %job.name(), %handle, %timer, attempts, "Job armed");
        Ok(())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .field("clock", &self.clock)
            .field("workload", &self.workload)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::ActivationConfig;
    use crate::clock::MockClock;
    use crate::timer::ManualTimerService;
    use crate::workload::{FnWorkload, IdleWorkload};
    use std::time::Duration;

    const MS: fn(u64) -> Duration = Duration::from_millis;

    fn config(capacity: usize) -> SchedulerConfig {
        SchedulerConfig::builder()
            .capacity(capacity)
            .activation(ActivationConfig {
                max_attempts: 3,
                retry_delay: Duration::ZERO,
                start_timeout: MS(10),
            })
            .build()
            .unwrap()
    }

    fn scheduler(capacity: usize) -> (Scheduler, Arc<ManualTimerService>) {
        let timers = Arc::new(ManualTimerService::new());
        let scheduler = Scheduler::new(config(capacity), timers.clone())
            .unwrap()
            .with_workload(Arc::new(IdleWorkload));
        (scheduler, timers)
    }

    #[test]
    fn test_register_arms_timer() {
        let (scheduler, timers) = scheduler(4);
        let handle = scheduler.register("A", 500, 1, 200).unwrap();

        let job = scheduler.job(handle).unwrap();
        assert_eq!(job.name, "A");
        assert_eq!(job.period, MS(500));
        assert!(job.armed);
        assert_eq!(timers.timer_count(), 1);
        assert_eq!(scheduler.snapshot().job_count, 1);
    }

    #[test]
    fn test_zero_period_rejected() {
        let (scheduler, timers) = scheduler(4);
        assert_eq!(
            scheduler.register("A", 0, 1, 200),
            Err(SchedulerError::InvalidPeriod)
        );
        assert_eq!(timers.timer_count(), 0);
        assert_eq!(scheduler.snapshot().job_count, 0);
    }

    #[test]
    fn test_pool_exhausted() {
        let (scheduler, _) = scheduler(2);
        scheduler.register("A", 500, 1, 200).unwrap();
        scheduler.register("B", 800, 3, 400).unwrap();

        assert_eq!(
            scheduler.register("C", 1000, 5, 500),
            Err(SchedulerError::PoolExhausted { capacity: 2 })
        );
        assert_eq!(scheduler.snapshot().job_count, 2);
    }

    #[test]
    fn test_creation_failure_leaves_job_unarmed() {
        let (scheduler, timers) = scheduler(2);
        timers.set_create_failure(true);

        let err = scheduler.register("A", 500, 1, 200).unwrap_err();
        let handle = err.job_handle().unwrap();
        assert!(matches!(err, SchedulerError::TimerCreationFailed { .. }));

        let job = scheduler.job(handle).unwrap();
        assert!(!job.armed);
        assert_eq!(scheduler.snapshot().job_count, 1);

        timers.set_create_failure(false);
        scheduler.rearm(handle).unwrap();
        assert!(scheduler.job(handle).unwrap().armed);
        assert_eq!(timers.timer_count(), 1);
    }

    #[test]
    fn test_activation_failure_then_rearm() {
        let (scheduler, timers) = scheduler(2);
        timers.fail_next_starts(3);

        let err = scheduler.register("A", 500, 1, 200).unwrap_err();
        let SchedulerError::ActivationFailed { handle, source } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(source.attempts, 3);
        assert!(!scheduler.job(handle).unwrap().armed);

        scheduler.rearm(handle).unwrap();
        assert!(scheduler.job(handle).unwrap().armed);
        // The timer created by the failed registration is reused.
        assert_eq!(timers.timer_count(), 1);

        scheduler.rearm(handle).unwrap();
        assert_eq!(timers.start_attempts(), 4);
    }

    #[test]
    fn test_unregister_frees_slot_and_deletes_timer() {
        let (scheduler, timers) = scheduler(1);
        let a = scheduler.register("A", 500, 1, 200).unwrap();

        let last = scheduler.unregister(a).unwrap();
        assert_eq!(last.name, "A");
        assert_eq!(timers.timer_count(), 0);
        assert_eq!(scheduler.snapshot().job_count, 0);

        assert_eq!(scheduler.unregister(a), Err(SchedulerError::UnknownJob(a)));
        assert_eq!(scheduler.job(a), Err(SchedulerError::UnknownJob(a)));

        let b = scheduler.register("B", 800, 3, 400).unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
    }

    #[test]
    fn test_rescale_pushes_periods_to_timers() {
        let (scheduler, timers) = scheduler(4);
        let a = scheduler.register("A", 500, 1, 200).unwrap();
        let adaptive = AdaptiveConfig::default();

        let changed = scheduler
            .rescale_periods(LoadFactor::from_permille(1200), &adaptive)
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(scheduler.job(a).unwrap().period, MS(600));

        let timer_changes = timers.period_changes();
        assert_eq!(timer_changes.len(), 1);
        assert_eq!(timer_changes[0].1, MS(600));
    }

    #[test]
    fn test_unity_factor_makes_no_timer_calls() {
        let (scheduler, timers) = scheduler(4);
        scheduler.register("A", 500, 1, 200).unwrap();

        let changed = scheduler
            .rescale_periods(LoadFactor::UNITY, &AdaptiveConfig::default())
            .unwrap();
        assert_eq!(changed, 0);
        assert!(timers.period_changes().is_empty());
    }

    #[test]
    fn test_rescale_respects_clamps() {
        let (scheduler, _) = scheduler(4);
        let a = scheduler.register("A", 500, 1, 200).unwrap();
        let adaptive = AdaptiveConfig::default().with_period_bounds(MS(450), MS(550));

        scheduler
            .rescale_periods(LoadFactor::from_permille(1200), &adaptive)
            .unwrap();
        assert_eq!(scheduler.job(a).unwrap().period, MS(550));

        // Already at the ceiling: nothing changes.
        let changed = scheduler
            .rescale_periods(LoadFactor::from_permille(1200), &adaptive)
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_fired_callback_updates_metrics() {
        let timers = Arc::new(ManualTimerService::new());
        let clock = Arc::new(MockClock::new());
        let work_clock = Arc::clone(&clock);
        let workload = FnWorkload::new(move |job: &JobSpec| {
            work_clock.advance(MS(50) * u32::from(job.priority));
        });

        let scheduler = Scheduler::new(config(4), timers.clone())
            .unwrap()
            .with_clock(clock)
            .with_workload(Arc::new(workload));

        let slow = scheduler.register("slow", 500, 5, 200).unwrap();
        let fast = scheduler.register("fast", 500, 1, 200).unwrap();
        assert_eq!(timers.fire_all(), 2);

        let metrics = scheduler.snapshot();
        assert_eq!(metrics.total_invocations, 2);
        assert_eq!(metrics.missed_deadlines, 1);

        assert_eq!(scheduler.job(slow).unwrap().missed_deadlines, 1);
        let fast = scheduler.job(fast).unwrap();
        assert_eq!(fast.missed_deadlines, 0);
        assert_eq!(fast.invocations, 1);
        assert_eq!(fast.last_execution, Some(MS(250)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            capacity: 0,
            ..SchedulerConfig::default()
        };
        let result = Scheduler::new(config, Arc::new(ManualTimerService::new()));
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_accessors() {
        let (scheduler, _) = scheduler(1);
        assert_eq!(scheduler.config().lock_timeout, MS(100));
        assert_eq!(scheduler.capacity(), 1);
        assert!(scheduler.jobs().unwrap().is_empty());
    }
}
