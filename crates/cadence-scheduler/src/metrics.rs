//! Lock-free scheduler metrics.
//!
//! Every field has exactly one writer: execution figures are written by job
//! callbacks on the dispatch thread, the load figure by the control loop, and
//! the job count under the table lock. Readers never block.
//!
//! Floating-point figures are stored as raw bits in `AtomicU64`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::saturating_nanos;

/// Aggregate metrics snapshot returned by [`SchedulerMetrics::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Smoothed execution latency in microseconds (weight ½ per sample).
    pub average_execution_us: f64,
    /// Number of registered jobs.
    pub job_count: u32,
    /// Most recent load estimate in percent.
    pub cpu_load_percent: f64,
    /// Invocations that exceeded their deadline.
    pub missed_deadlines: u64,
    /// Completed job invocations.
    pub total_invocations: u64,
    /// Control cycles that rescaled the job table.
    pub control_cycles: u64,
    /// Control cycles skipped because the table lock was busy.
    pub skipped_control_cycles: u64,
}

impl SystemMetrics {
    /// Fraction of invocations that missed their deadline, in percent.
    #[must_use]
    pub fn missed_deadline_rate(&self) -> f64 {
        if self.total_invocations == 0 {
            return 0.0;
        }
        (self.missed_deadlines as f64 / self.total_invocations as f64) * 100.0
    }
}

/// Shared atomic storage behind [`SystemMetrics`].
#[derive(Debug)]
pub struct SchedulerMetrics {
    average_execution_us: AtomicU64,
    job_count: AtomicU32,
    cpu_load_percent: AtomicU64,
    missed_deadlines: AtomicU64,
    total_invocations: AtomicU64,
    control_cycles: AtomicU64,
    skipped_control_cycles: AtomicU64,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            average_execution_us: AtomicU64::new(0),
            job_count: AtomicU32::new(0),
            cpu_load_percent: AtomicU64::new(0),
            missed_deadlines: AtomicU64::new(0),
            total_invocations: AtomicU64::new(0),
            control_cycles: AtomicU64::new(0),
            skipped_control_cycles: AtomicU64::new(0),
        }
    }

    /// Fold one execution into the smoothed latency and return the new average.
    ///
    /// Single writer: the dispatch thread.
    pub fn record_execution(&self, duration: Duration) -> f64 {
        let duration_us = duration.as_secs_f64() * 1_000_000.0;
        let previous = f64::from_bits(self.average_execution_us.load(Ordering::Relaxed));
        let average = (previous + duration_us) / 2.0;
        self.average_execution_us
            .store(average.to_bits(), Ordering::Relaxed);
        self.total_invocations.fetch_add(1, Ordering::Relaxed);
        average
    }

    /// Count a missed deadline.
    #[inline]
    pub fn inc_missed_deadline(&self) {
        self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the latest load estimate, clamped to `[0, 100]`.
    ///
    /// Called once per control cycle with the estimator's sample.
    pub fn set_cpu_load(&self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.cpu_load_percent
            .store(percent.to_bits(), Ordering::Relaxed);
    }

    /// Store the registered job count.
    pub fn set_job_count(&self, count: usize) {
        self.job_count
            .store(u32::try_from(count).unwrap_or(u32::MAX), Ordering::Relaxed);
    }

    /// Count an applied control cycle.
    #[inline]
    pub fn inc_control_cycle(&self) {
        self.control_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a skipped control cycle.
    #[inline]
    pub fn inc_skipped_control_cycle(&self) {
        self.skipped_control_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest load estimate.
    #[must_use]
    pub fn cpu_load_percent(&self) -> f64 {
        f64::from_bits(self.cpu_load_percent.load(Ordering::Relaxed))
    }

    /// Read every figure without blocking.
    #[must_use]
    pub fn snapshot(&self) -> SystemMetrics {
        SystemMetrics {
            average_execution_us: f64::from_bits(
                self.average_execution_us.load(Ordering::Relaxed),
            ),
            job_count: self.job_count.load(Ordering::Relaxed),
            cpu_load_percent: self.cpu_load_percent(),
            missed_deadlines: self.missed_deadlines.load(Ordering::Relaxed),
            total_invocations: self.total_invocations.load(Ordering::Relaxed),
            control_cycles: self.control_cycles.load(Ordering::Relaxed),
            skipped_control_cycles: self.skipped_control_cycles.load(Ordering::Relaxed),
        }
    }
}

const NEVER_EXECUTED: u64 = u64::MAX;

/// Per-job counters shared between the job table and the job's callback.
#[derive(Debug)]
pub struct JobRuntime {
    last_execution_ns: AtomicU64,
    invocations: AtomicU64,
    missed_deadlines: AtomicU64,
}

impl Default for JobRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRuntime {
    /// Create counters for a job that has not run yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_execution_ns: AtomicU64::new(NEVER_EXECUTED),
            invocations: AtomicU64::new(0),
            missed_deadlines: AtomicU64::new(0),
        }
    }

    /// Record one invocation that started at `started_at`.
    pub fn record_invocation(&self, started_at: Duration, missed_deadline: bool) {
        let started_ns = saturating_nanos(started_at).min(NEVER_EXECUTED - 1);
        self.last_execution_ns.store(started_ns, Ordering::Relaxed);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if missed_deadline {
            self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Start time of the latest invocation.
    #[must_use]
    pub fn last_execution(&self) -> Option<Duration> {
        match self.last_execution_ns.load(Ordering::Relaxed) {
            NEVER_EXECUTED => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }

    /// Completed invocations.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Invocations that exceeded the deadline.
    #[must_use]
    pub fn missed_deadlines(&self) -> u64 {
        self.missed_deadlines.load(Ordering::Relaxed)
    }
}
