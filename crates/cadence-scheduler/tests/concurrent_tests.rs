//! Concurrency tests: table lock contention and lock-free metric reads.

use cadence_scheduler::{
    ActivationConfig, AdaptiveConfig, AdaptiveController, ControlOutcome, FixedLoad, FnWorkload,
    IdleWorkload, JobSpec, LoadFactor, ManualTimerService, MockClock, Scheduler, SchedulerConfig,
    SchedulerError, TimerCallback, TimerError, TimerHandle, TimerResult, TimerService,
};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Timer service whose `change_period` parks until released, so a rescale
/// holds the table lock for as long as the test needs.
struct BlockingTimers {
    inner: ManualTimerService,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl TimerService for BlockingTimers {
    fn create(
        &self,
        name: &str,
        period: Duration,
        repeating: bool,
        callback: TimerCallback,
    ) -> TimerResult<TimerHandle> {
        self.inner.create(name, period, repeating, callback)
    }

    fn start(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.inner.start(timer, timeout)
    }

    fn stop(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.inner.stop(timer, timeout)
    }

    fn reset(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.inner.reset(timer, timeout)
    }

    fn change_period(
        &self,
        timer: TimerHandle,
        new_period: Duration,
        timeout: Duration,
    ) -> TimerResult<()> {
        self.entered
            .send(())
            .map_err(|err| TimerError::rejected(err.to_string()))?;
        self.release
            .recv()
            .map_err(|err| TimerError::rejected(err.to_string()))?;
        self.inner.change_period(timer, new_period, timeout)
    }

    fn delete(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.inner.delete(timer, timeout)
    }
}

fn config(capacity: usize, lock_timeout: Duration) -> SchedulerConfig {
    SchedulerConfig::builder()
        .capacity(capacity)
        .lock_timeout(lock_timeout)
        .activation(ActivationConfig {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            start_timeout: Duration::from_millis(10),
        })
        .build()
        .unwrap()
}

#[test]
fn test_snapshot_does_not_wait_for_table_lock() {
    let (entered_tx, entered_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded(1);
    let timers = Arc::new(BlockingTimers {
        inner: ManualTimerService::new(),
        entered: entered_tx,
        release: release_rx,
    });

    let lock_timeout = Duration::from_millis(50);
    let scheduler = Arc::new(
        Scheduler::new(config(4, lock_timeout), timers)
            .unwrap()
            .with_workload(Arc::new(IdleWorkload)),
    );
    scheduler.register("A", 500, 1, 200).unwrap();

    let rescaler = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            scheduler.rescale_periods(LoadFactor::from_permille(1200), &AdaptiveConfig::default())
        })
    };

    // The rescaler now holds the table lock inside `change_period`.
    entered_rx.recv().unwrap();

    let started = Instant::now();
    let metrics = scheduler.snapshot();
    assert!(started.elapsed() < lock_timeout);
    assert_eq!(metrics.job_count, 1);

    assert_eq!(
        scheduler.register("B", 800, 3, 400),
        Err(SchedulerError::LockTimeout(lock_timeout))
    );
    assert!(matches!(
        scheduler.jobs(),
        Err(SchedulerError::LockTimeout(_))
    ));

    let mut controller = AdaptiveController::new(AdaptiveConfig::default(), FixedLoad(90.0));
    let outcome = controller.run_cycle(&scheduler);
    assert!(matches!(outcome, ControlOutcome::Skipped { .. }));
    assert_eq!(scheduler.snapshot().skipped_control_cycles, 1);
    assert_eq!(scheduler.snapshot().control_cycles, 0);

    release_tx.send(()).unwrap();
    assert_eq!(rescaler.join().unwrap(), Ok(1));

    let jobs = scheduler.jobs().unwrap();
    assert_eq!(jobs[0].period, Duration::from_millis(600));
}

#[test]
fn test_concurrent_registration_respects_capacity() {
    let timers = Arc::new(ManualTimerService::new());
    let scheduler = Arc::new(
        Scheduler::new(config(10, Duration::from_secs(5)), timers.clone())
            .unwrap()
            .with_workload(Arc::new(IdleWorkload)),
    );

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                let mut accepted = 0;
                let mut exhausted = 0;
                for i in 0..4 {
                    match scheduler.register(&format!("t{t}-{i}"), 100, 0, 50) {
                        Ok(_) => accepted += 1,
                        Err(SchedulerError::PoolExhausted { .. }) => exhausted += 1,
                        Err(e) => panic!("Unexpected error: {e}"),
                    }
                }
                (accepted, exhausted)
            })
        })
        .collect();

    let (accepted, exhausted) = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .fold((0, 0), |(a, e), (da, de)| (a + da, e + de));

    assert_eq!(accepted, 10);
    assert_eq!(exhausted, 22);
    assert_eq!(scheduler.snapshot().job_count, 10);
    assert_eq!(timers.timer_count(), 10);
}

#[test]
fn test_metrics_readers_observe_monotone_counters() {
    let timers = Arc::new(ManualTimerService::new());
    let clock = Arc::new(MockClock::new());
    let work_clock = Arc::clone(&clock);
    let workload = FnWorkload::new(move |_: &JobSpec| {
        work_clock.advance(Duration::from_millis(300));
    });

    let scheduler = Arc::new(
        Scheduler::new(config(4, Duration::from_millis(100)), timers.clone())
            .unwrap()
            .with_clock(clock)
            .with_workload(Arc::new(workload)),
    );
    scheduler.register("A", 500, 1, 200).unwrap();
    scheduler.register("B", 800, 3, 400).unwrap();

    let firer = {
        let timers = Arc::clone(&timers);
        thread::spawn(move || {
            for _ in 0..200 {
                timers.fire_all();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                let mut last_missed = 0;
                let mut last_total = 0;
                for _ in 0..500 {
                    let metrics = scheduler.snapshot();
                    assert!(metrics.missed_deadlines >= last_missed);
                    assert!(metrics.total_invocations >= last_total);
                    last_missed = metrics.missed_deadlines;
                    last_total = metrics.total_invocations;
                }
            })
        })
        .collect();

    firer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let metrics = scheduler.snapshot();
    assert_eq!(metrics.total_invocations, 400);
    // 300 ms of work misses A's 200 ms deadline but not B's 400 ms one.
    assert_eq!(metrics.missed_deadlines, 200);
}
