//! Deterministic timer service driven by the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::{TimerCallback, TimerHandle, TimerService};
use crate::error::{TimerError, TimerResult};

struct ManualTimer {
    name: String,
    period: Duration,
    repeating: bool,
    running: bool,
    /// Taken out while the callback runs so it never executes under the lock.
    callback: Option<TimerCallback>,
}

#[derive(Default)]
struct ManualState {
    timers: BTreeMap<u64, ManualTimer>,
    next_id: u64,
    failing_starts: u32,
    failing_creates: bool,
    start_attempts: u64,
    period_changes: Vec<(TimerHandle, Duration)>,
}

/// Timer service whose callbacks run only when [`fire`](Self::fire) or
/// [`fire_all`](Self::fire_all) is called.
///
/// Failures of `create` and `start` can be injected to exercise the
/// scheduler's retry and error paths.
#[derive(Default)]
pub struct ManualTimerService {
    state: Mutex<ManualState>,
}

impl ManualTimerService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `start` fail with [`TimerError::Timeout`].
    pub fn fail_next_starts(&self, count: u32) {
        self.state.lock().failing_starts = count;
    }

    /// Make every call to `create` fail until cleared.
    pub fn set_create_failure(&self, fail: bool) {
        self.state.lock().failing_creates = fail;
    }

    /// Run one timer's callback on the calling thread if the timer is running.
    ///
    /// Returns `Ok(false)` for a dormant timer. One-shot timers go dormant
    /// after firing.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::UnknownTimer`] for a deleted or unknown handle.
    pub fn fire(&self, timer: TimerHandle) -> TimerResult<bool> {
        let mut callback = {
            let mut state = self.state.lock();
            let entry = state
                .timers
                .get_mut(&timer.raw())
                .ok_or(TimerError::UnknownTimer)?;
            if !entry.running {
                return Ok(false);
            }
            let Some(callback) = entry.callback.take() else {
                // Re-entrant fire from inside the callback itself.
                return Ok(false);
            };
            if !entry.repeating {
                entry.running = false;
            }
            callback
        };

        callback();

        if let Some(entry) = self.state.lock().timers.get_mut(&timer.raw()) {
            entry.callback = Some(callback);
        }
        Ok(true)
    }

    /// Fire every running timer once, in creation order.
    ///
    /// Returns the number of callbacks run.
    pub fn fire_all(&self) -> usize {
        let handles: Vec<TimerHandle> = {
            let state = self.state.lock();
            state
                .timers
                .iter()
                .filter(|(_, entry)| entry.running)
                .map(|(id, _)| TimerHandle::from_raw(*id))
                .collect()
        };

        handles
            .into_iter()
            .filter(|timer| matches!(self.fire(*timer), Ok(true)))
            .count()
    }

    /// Whether the timer exists and is armed.
    #[must_use]
    pub fn is_running(&self, timer: TimerHandle) -> bool {
        self.state
            .lock()
            .timers
            .get(&timer.raw())
            .is_some_and(|entry| entry.running)
    }

    /// Current period of a timer.
    #[must_use]
    pub fn period(&self, timer: TimerHandle) -> Option<Duration> {
        self.state
            .lock()
            .timers
            .get(&timer.raw())
            .map(|entry| entry.period)
    }

    /// Name a timer was created with.
    #[must_use]
    pub fn name(&self, timer: TimerHandle) -> Option<String> {
        self.state
            .lock()
            .timers
            .get(&timer.raw())
            .map(|entry| entry.name.clone())
    }

    /// Every successful `change_period` call, in order.
    #[must_use]
    pub fn period_changes(&self) -> Vec<(TimerHandle, Duration)> {
        self.state.lock().period_changes.clone()
    }

    /// Number of `start` calls, successful or not.
    #[must_use]
    pub fn start_attempts(&self) -> u64 {
        self.state.lock().start_attempts
    }

    /// Number of live timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    fn with_timer<T>(
        &self,
        timer: TimerHandle,
        op: impl FnOnce(&mut ManualTimer) -> T,
    ) -> TimerResult<T> {
        let mut state = self.state.lock();
        let entry = state
            .timers
            .get_mut(&timer.raw())
            .ok_or(TimerError::UnknownTimer)?;
        Ok(op(entry))
    }
}

impl TimerService for ManualTimerService {
    fn create(
        &self,
        name: &str,
        period: Duration,
        repeating: bool,
        callback: TimerCallback,
    ) -> TimerResult<TimerHandle> {
        if period.is_zero() {
            return Err(TimerError::InvalidPeriod);
        }

        let mut state = self.state.lock();
        if state.failing_creates {
            return Err(TimerError::rejected("timer creation disabled"));
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.timers.insert(
            id,
            ManualTimer {
                name: name.to_string(),
                period,
                repeating,
                running: false,
                callback: Some(callback),
            },
        );
        Ok(TimerHandle::from_raw(id))
    }

    fn start(&self, timer: TimerHandle, _timeout: Duration) -> TimerResult<()> {
        {
            let mut state = self.state.lock();
            state.start_attempts = state.start_attempts.saturating_add(1);
            if state.failing_starts > 0 {
                state.failing_starts -= 1;
                return Err(TimerError::Timeout);
            }
        }
        self.with_timer(timer, |entry| entry.running = true)
    }

    fn stop(&self, timer: TimerHandle, _timeout: Duration) -> TimerResult<()> {
        self.with_timer(timer, |entry| entry.running = false)
    }

    fn reset(&self, timer: TimerHandle, _timeout: Duration) -> TimerResult<()> {
        self.with_timer(timer, |entry| entry.running = true)
    }

    fn change_period(
        &self,
        timer: TimerHandle,
        new_period: Duration,
        _timeout: Duration,
    ) -> TimerResult<()> {
        if new_period.is_zero() {
            return Err(TimerError::InvalidPeriod);
        }
        self.with_timer(timer, |entry| entry.period = new_period)?;
        self.state.lock().period_changes.push((timer, new_period));
        Ok(())
    }

    fn delete(&self, timer: TimerHandle, _timeout: Duration) -> TimerResult<()> {
        self.state
            .lock()
            .timers
            .remove(&timer.raw())
            .map(|_| ())
            .ok_or(TimerError::UnknownTimer)
    }
}

impl std::fmt::Debug for ManualTimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualTimerService")
            .field("timers", &state.timers.len())
            .field("failing_starts", &state.failing_starts)
            .field("failing_creates", &state.failing_creates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn counter_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fire_requires_start() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = service
            .create("A", Duration::from_millis(500), true, counter_callback(&counter))
            .unwrap();

        assert_eq!(service.fire(timer), Ok(false));
        service.start(timer, TIMEOUT).unwrap();
        assert_eq!(service.fire(timer), Ok(true));
        assert_eq!(service.fire(timer), Ok(true));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_one_shot_goes_dormant() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = service
            .create("once", Duration::from_millis(5), false, counter_callback(&counter))
            .unwrap();
        service.start(timer, TIMEOUT).unwrap();

        assert_eq!(service.fire(timer), Ok(true));
        assert_eq!(service.fire(timer), Ok(false));
        assert!(!service.is_running(timer));
    }

    #[test]
    fn test_injected_start_failures() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = service
            .create("A", Duration::from_millis(5), true, counter_callback(&counter))
            .unwrap();

        service.fail_next_starts(2);
        assert_eq!(service.start(timer, TIMEOUT), Err(TimerError::Timeout));
        assert_eq!(service.start(timer, TIMEOUT), Err(TimerError::Timeout));
        assert_eq!(service.start(timer, TIMEOUT), Ok(()));
        assert_eq!(service.start_attempts(), 3);
    }

    #[test]
    fn test_injected_create_failure() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        service.set_create_failure(true);

        let result = service.create("A", Duration::from_millis(5), true, counter_callback(&counter));
        assert!(matches!(result, Err(TimerError::Rejected(_))));
        assert_eq!(service.timer_count(), 0);
    }

    #[test]
    fn test_fire_all_and_period_changes() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = service
            .create("A", Duration::from_millis(5), true, counter_callback(&counter))
            .unwrap();
        let b = service
            .create("B", Duration::from_millis(5), true, counter_callback(&counter))
            .unwrap();
        service.start(a, TIMEOUT).unwrap();

        assert_eq!(service.fire_all(), 1);
        service.start(b, TIMEOUT).unwrap();
        assert_eq!(service.fire_all(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        service
            .change_period(b, Duration::from_millis(9), TIMEOUT)
            .unwrap();
        assert_eq!(service.period(b), Some(Duration::from_millis(9)));
        assert_eq!(
            service.period_changes(),
            vec![(b, Duration::from_millis(9))]
        );
        assert_eq!(service.name(b).as_deref(), Some("B"));
    }

    #[test]
    fn test_delete() {
        let service = ManualTimerService::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = service
            .create("A", Duration::from_millis(5), true, counter_callback(&counter))
            .unwrap();

        service.delete(timer, TIMEOUT).unwrap();
        assert_eq!(service.fire(timer), Err(TimerError::UnknownTimer));
        assert_eq!(service.delete(timer, TIMEOUT), Err(TimerError::UnknownTimer));
    }
}
