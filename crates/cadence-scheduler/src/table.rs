//! Fixed-capacity job table.
//!
//! Slots are allocated first-fit and addressed by [`JobHandle`]s that carry a
//! generation counter, so a handle to a released slot never aliases the job
//! that later reuses it. The table itself is not synchronized; the scheduler
//! guards it with the table lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::JobRuntime;
use crate::timer::TimerHandle;

/// Maximum stored length of a job name in bytes.
pub const MAX_JOB_NAME_LEN: usize = 15;

/// Generation-checked reference to a job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobHandle {
    index: u32,
    generation: u32,
}

impl JobHandle {
    /// Create a handle from raw parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at the time the handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Static description of a periodic job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Short identifier, truncated to [`MAX_JOB_NAME_LEN`] bytes.
    pub name: String,
    /// Time between invocations.
    pub period: Duration,
    /// Sizes the simulated workload; not an OS priority.
    pub priority: u8,
    /// Execution budget per invocation.
    pub deadline: Duration,
}

impl JobSpec {
    /// Create a job description.
    #[must_use]
    pub fn new(name: &str, period: Duration, priority: u8, deadline: Duration) -> Self {
        Self {
            name: truncate_name(name),
            period,
            priority,
            deadline,
        }
    }

    /// Create a job description from millisecond values.
    #[must_use]
    pub fn from_millis(name: &str, period_ms: u32, priority: u8, deadline_ms: u32) -> Self {
        Self::new(
            name,
            Duration::from_millis(u64::from(period_ms)),
            priority,
            Duration::from_millis(u64::from(deadline_ms)),
        )
    }
}

fn truncate_name(name: &str) -> String {
    name.char_indices()
        .take_while(|(offset, ch)| offset + ch.len_utf8() <= MAX_JOB_NAME_LEN)
        .map(|(_, ch)| ch)
        .collect()
}

/// An occupied job slot.
#[derive(Debug)]
pub struct Job {
    spec: JobSpec,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) armed: bool,
    runtime: Arc<JobRuntime>,
}

impl Job {
    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Current period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.spec.period
    }

    /// Job description with the current period.
    #[must_use]
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Backing timer, once created.
    #[must_use]
    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    /// Whether the backing timer was started.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Counters shared with the job's callback.
    #[must_use]
    pub fn runtime(&self) -> &Arc<JobRuntime> {
        &self.runtime
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.spec.period = period;
    }

    /// Point-in-time view of this job.
    #[must_use]
    pub fn snapshot(&self, handle: JobHandle) -> JobSnapshot {
        JobSnapshot {
            handle,
            name: self.spec.name.clone(),
            period: self.spec.period,
            priority: self.spec.priority,
            deadline: self.spec.deadline,
            armed: self.armed,
            last_execution: self.runtime.last_execution(),
            invocations: self.runtime.invocations(),
            missed_deadlines: self.runtime.missed_deadlines(),
        }
    }
}

/// Point-in-time view of a registered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    /// Handle addressing the job.
    pub handle: JobHandle,
    /// Job name.
    pub name: String,
    /// Current period.
    pub period: Duration,
    /// Workload priority.
    pub priority: u8,
    /// Execution budget.
    pub deadline: Duration,
    /// Whether the backing timer is running.
    pub armed: bool,
    /// Start time of the latest invocation on the scheduler clock.
    pub last_execution: Option<Duration>,
    /// Completed invocations.
    pub invocations: u64,
    /// Invocations that exceeded the deadline.
    pub missed_deadlines: u64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    job: Option<Job>,
}

/// Fixed-capacity arena of job slots.
#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Slot>,
}

impl JobTable {
    /// Create a table with `capacity` free slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.job.is_some()).count()
    }

    /// Whether every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|slot| slot.job.is_some())
    }

    /// Place a job in the first free slot.
    ///
    /// Returns `None` when the table is full.
    pub fn allocate(&mut self, spec: JobSpec, runtime: Arc<JobRuntime>) -> Option<JobHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.job.is_none())?;
        let index = u32::try_from(index).ok()?;

        slot.job = Some(Job {
            spec,
            timer: None,
            armed: false,
            runtime,
        });
        Some(JobHandle::new(index, slot.generation))
    }

    /// Look up a live job.
    #[must_use]
    pub fn get(&self, handle: JobHandle) -> Option<&Job> {
        self.slot(handle)?.job.as_ref()
    }

    /// Look up a live job mutably.
    pub fn get_mut(&mut self, handle: JobHandle) -> Option<&mut Job> {
        let slot = self.slots.get_mut(usize::try_from(handle.index).ok()?)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.job.as_mut()
    }

    /// Free a slot, invalidating every outstanding handle to it.
    pub fn release(&mut self, handle: JobHandle) -> Option<Job> {
        let slot = self.slots.get_mut(usize::try_from(handle.index).ok()?)?;
        if slot.generation != handle.generation {
            return None;
        }
        let job = slot.job.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(job)
    }

    /// Iterate over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (JobHandle, &Job)> + '_ {
        self.slots.iter().zip(0u32..).filter_map(|(slot, index)| {
            slot.job
                .as_ref()
                .map(|job| (JobHandle::new(index, slot.generation), job))
        })
    }

    /// Iterate mutably over occupied slots in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (JobHandle, &mut Job)> + '_ {
        self.slots.iter_mut().zip(0u32..).filter_map(|(slot, index)| {
            let generation = slot.generation;
            slot.job
                .as_mut()
                .map(|job| (JobHandle::new(index, generation), job))
        })
    }

    fn slot(&self, handle: JobHandle) -> Option<&Slot> {
        let slot = self.slots.get(usize::try_from(handle.index).ok()?)?;
        (slot.generation == handle.generation).then_some(slot)
    }
}
