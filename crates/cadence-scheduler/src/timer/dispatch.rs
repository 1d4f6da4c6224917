//! Threaded timer service.
//!
//! A single dispatcher thread owns every timer. Callers talk to it over a
//! bounded command channel and wait for the reply with a timeout. Between
//! commands the thread sleeps until the earliest pending expiry, pops due
//! timers from a min-heap and runs their callbacks one after another, so no
//! two callbacks ever overlap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{
    self, Receiver, RecvTimeoutError, SendError, SendTimeoutError, Sender,
};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{TimerCallback, TimerHandle, TimerService};
use crate::clock::saturating_nanos;
use crate::error::{TimerError, TimerResult};

/// Default depth of the command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default bound on `create`, which takes no caller-supplied timeout.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_millis(100);

/// Busy-time accounting for the dispatcher thread.
#[derive(Debug)]
pub struct DispatchStats {
    started: Instant,
    busy_ns: AtomicU64,
    callbacks_run: AtomicU64,
}

impl DispatchStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            busy_ns: AtomicU64::new(0),
            callbacks_run: AtomicU64::new(0),
        }
    }

    fn record_callback(&self, spent: Duration) {
        self.busy_ns
            .fetch_add(saturating_nanos(spent), Ordering::Relaxed);
        self.callbacks_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Total time spent inside callbacks.
    #[must_use]
    pub fn busy_time(&self) -> Duration {
        Duration::from_nanos(self.busy_ns.load(Ordering::Relaxed))
    }

    /// Time since the dispatcher was spawned.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of callbacks run so far.
    #[must_use]
    pub fn callbacks_run(&self) -> u64 {
        self.callbacks_run.load(Ordering::Relaxed)
    }
}

type Reply<T> = Sender<TimerResult<T>>;

enum Command {
    Create {
        name: String,
        period: Duration,
        repeating: bool,
        callback: TimerCallback,
        reply: Reply<TimerHandle>,
    },
    Start {
        timer: TimerHandle,
        reply: Reply<()>,
    },
    Stop {
        timer: TimerHandle,
        reply: Reply<()>,
    },
    Reset {
        timer: TimerHandle,
        reply: Reply<()>,
    },
    ChangePeriod {
        timer: TimerHandle,
        period: Duration,
        reply: Reply<()>,
    },
    Delete {
        timer: TimerHandle,
        reply: Reply<()>,
    },
    Shutdown,
}

/// Timer service backed by a dedicated dispatcher thread.
pub struct DispatchTimerService {
    commands: Sender<Command>,
    create_timeout: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<DispatchStats>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchTimerService {
    /// Spawn a dispatcher with default channel depth and create timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher thread cannot be spawned.
    pub fn spawn() -> io::Result<Self> {
        Self::spawn_with(DEFAULT_COMMAND_CAPACITY, DEFAULT_CREATE_TIMEOUT)
    }

    /// Spawn a dispatcher with an explicit channel depth and create timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher thread cannot be spawned.
    pub fn spawn_with(command_capacity: usize, create_timeout: Duration) -> io::Result<Self> {
        let (commands, command_rx) = channel::bounded(command_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(DispatchStats::new());

        let dispatcher = Dispatcher {
            timers: HashMap::new(),
            queue: BinaryHeap::new(),
            next_id: 0,
            stats: Arc::clone(&stats),
        };
        let thread_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("timer-dispatch".to_string())
            .spawn(move || dispatcher.run(&command_rx, &thread_running))?;

        Ok(Self {
            commands,
            create_timeout,
            running,
            stats,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Busy-time accounting shared with load estimators.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the dispatcher thread is accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the dispatcher thread and wait for it to exit.
    ///
    /// Pending timers are dropped. Safe to call more than once.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        // A full channel means the dispatcher is awake and will see the flag.
        if self.commands.try_send(Command::Shutdown).is_err() {
            debug!("Dispatcher command channel busy during shutdown");
        }

        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Timer dispatcher thread panicked");
        }
    }

    /// Send a command and wait for its reply.
    ///
    /// A command whose reply times out may still run on the dispatcher. The
    /// one exception is `Create`, whose timer is dropped when nobody is left
    /// to receive the handle.
    fn request<T>(
        &self,
        timeout: Duration,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> TimerResult<T> {
        if !self.is_running() {
            return Err(TimerError::ServiceStopped);
        }

        let (reply_tx, reply_rx) = channel::bounded(1);
        match self.commands.send_timeout(build(reply_tx), timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(TimerError::Timeout),
            Err(SendTimeoutError::Disconnected(_)) => return Err(TimerError::ServiceStopped),
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TimerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TimerError::ServiceStopped),
        }
    }
}

impl TimerService for DispatchTimerService {
    fn create(
        &self,
        name: &str,
        period: Duration,
        repeating: bool,
        callback: TimerCallback,
    ) -> TimerResult<TimerHandle> {
        let name = name.to_string();
        self.request(self.create_timeout, move |reply| Command::Create {
            name,
            period,
            repeating,
            callback,
            reply,
        })
    }

    fn start(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.request(timeout, |reply| Command::Start { timer, reply })
    }

    fn stop(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.request(timeout, |reply| Command::Stop { timer, reply })
    }

    fn reset(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.request(timeout, |reply| Command::Reset { timer, reply })
    }

    fn change_period(
        &self,
        timer: TimerHandle,
        new_period: Duration,
        timeout: Duration,
    ) -> TimerResult<()> {
        self.request(timeout, |reply| Command::ChangePeriod {
            timer,
            period: new_period,
            reply,
        })
    }

    fn delete(&self, timer: TimerHandle, timeout: Duration) -> TimerResult<()> {
        self.request(timeout, |reply| Command::Delete { timer, reply })
    }
}

impl Drop for DispatchTimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchTimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTimerService")
            .field("running", &self.is_running())
            .field("callbacks_run", &self.stats.callbacks_run())
            .finish()
    }
}

struct TimerEntry {
    name: String,
    period: Duration,
    repeating: bool,
    callback: TimerCallback,
    expiry: Option<Instant>,
    /// Bumped on every re-arm so stale heap entries can be skipped.
    epoch: u64,
}

impl TimerEntry {
    fn arm(&mut self, id: u64, at: Instant, queue: &mut BinaryHeap<Reverse<(Instant, u64, u64)>>) {
        self.epoch = self.epoch.wrapping_add(1);
        self.expiry = Some(at);
        queue.push(Reverse((at, id, self.epoch)));
    }

    fn disarm(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.expiry = None;
    }
}

struct Dispatcher {
    timers: HashMap<u64, TimerEntry>,
    queue: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    next_id: u64,
    stats: Arc<DispatchStats>,
}

/// Clears the running flag however the dispatcher loop exits.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        if thread::panicking() {
            error!("Timer dispatcher thread panicked");
        }
    }
}

/// Expiry one `period` after `from`, if it fits in an `Instant`.
fn expiry_after(from: Instant, period: Duration) -> TimerResult<Instant> {
    if period.is_zero() {
        return Err(TimerError::InvalidPeriod);
    }
    from.checked_add(period).ok_or(TimerError::InvalidPeriod)
}

impl Dispatcher {
    fn run(mut self, commands: &Receiver<Command>, running: &AtomicBool) {
        let _running = ClearOnExit(running);
        info!("Timer dispatcher started");

        while running.load(Ordering::Acquire) {
            self.fire_due();

            let received = match self.next_expiry() {
                Some(deadline) => commands.recv_deadline(deadline),
                None => commands
                    .recv()
                    .map_err(|_disconnected| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        info!(
            callbacks_run = self.stats.callbacks_run(),
            "Timer dispatcher stopped"
        );
    }

    fn next_expiry(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, id, epoch))) = self.queue.peek().copied() {
            if self.is_current(id, epoch) {
                return Some(at);
            }
            self.queue.pop();
        }
        None
    }

    fn is_current(&self, id: u64, epoch: u64) -> bool {
        self.timers
            .get(&id)
            .is_some_and(|entry| entry.epoch == epoch && entry.expiry.is_some())
    }

    fn fire_due(&mut self) {
        loop {
            let now = Instant::now();
            let Some(Reverse((at, id, epoch))) = self.queue.peek().copied() else {
                return;
            };
            if at > now {
                return;
            }
            self.queue.pop();

            let Some(entry) = self.timers.get_mut(&id) else {
                continue;
            };
            if entry.epoch != epoch || entry.expiry.is_none() {
                continue;
            }

            let began = Instant::now();
            (entry.callback)();
            let finished = Instant::now();
            self.stats
                .record_callback(finished.saturating_duration_since(began));

            if entry.repeating {
                // Keep phase when on time; skip missed expiries instead of bursting.
                let next = match expiry_after(at, entry.period) {
                    Ok(next) if next > finished => Ok(next),
                    _ => expiry_after(finished, entry.period),
                };
                match next {
                    Ok(next) => entry.arm(id, next, &mut self.queue),
                    Err(_) => entry.disarm(),
                }
            } else {
                entry.disarm();
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Create {
                name,
                period,
                repeating,
                callback,
                reply,
            } => {
                let result = expiry_after(Instant::now(), period).map(|_| {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    debug!(timer = id, name = %name, ?period, repeating, "Timer created");
                    self.timers.insert(
                        id,
                        TimerEntry {
                            name,
                            period,
                            repeating,
                            callback,
                            expiry: None,
                            epoch: 0,
                        },
                    );
                    TimerHandle::from_raw(id)
                });
                // A requester that timed out never learns the handle; drop the orphan.
                if let Err(SendError(Ok(orphan))) = reply.send(result) {
                    self.timers.remove(&orphan.raw());
                    debug!(timer = orphan.raw(), "Timer dropped after create timed out");
                }
            }
            Command::Start { timer, reply } | Command::Reset { timer, reply } => {
                let result = self.with_timer(timer, |id, entry, queue| {
                    let at = expiry_after(Instant::now(), entry.period)?;
                    entry.arm(id, at, queue);
                    Ok(())
                });
                respond(&reply, result);
            }
            Command::Stop { timer, reply } => {
                let result = self.with_timer(timer, |_, entry, _| {
                    entry.disarm();
                    Ok(())
                });
                respond(&reply, result);
            }
            Command::ChangePeriod {
                timer,
                period,
                reply,
            } => {
                let result = match expiry_after(Instant::now(), period) {
                    Err(err) => Err(err),
                    Ok(at) => self.with_timer(timer, |id, entry, queue| {
                        entry.period = period;
                        if entry.expiry.is_some() {
                            entry.arm(id, at, queue);
                        }
                        debug!(timer = id, name = %entry.name, ?period, "Timer period changed");
                        Ok(())
                    }),
                };
                respond(&reply, result);
            }
            Command::Delete { timer, reply } => {
                let result = match self.timers.remove(&timer.raw()) {
                    Some(entry) => {
                        debug!(timer = timer.raw(), name = %entry.name, "Timer deleted");
                        Ok(())
                    }
                    None => Err(TimerError::UnknownTimer),
                };
                respond(&reply, result);
            }
            Command::Shutdown => {}
        }
    }

    fn with_timer(
        &mut self,
        timer: TimerHandle,
        op: impl FnOnce(
            u64,
            &mut TimerEntry,
            &mut BinaryHeap<Reverse<(Instant, u64, u64)>>,
        ) -> TimerResult<()>,
    ) -> TimerResult<()> {
        let id = timer.raw();
        let entry = self.timers.get_mut(&id).ok_or(TimerError::UnknownTimer)?;
        op(id, entry, &mut self.queue)
    }
}

fn respond<T>(reply: &Reply<T>, result: TimerResult<T>) {
    if reply.send(result).is_err() {
        debug!("Timer command requester gave up before the reply");
    }
}
