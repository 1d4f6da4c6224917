//! Adaptive period control.
//!
//! The controller samples system load, maps it onto one of three bands and
//! scales every active job's period by that band's factor in a single pass
//! under the table lock:
//!
//! | load            | band     | factor |
//! |-----------------|----------|--------|
//! | above `high`    | `High`   | ×1.2   |
//! | below `low`     | `Low`    | ×0.8   |
//! | otherwise       | `Normal` | ×1.0   |
//!
//! Scaled periods are clamped to `[min_period, max_period]` so repeated cycles
//! in the same band cannot drift without bound.

use std::cmp::Ordering;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::saturating_nanos;
use crate::load::LoadEstimator;
use crate::scheduler::Scheduler;

const PERMILLE: u64 = 1000;

/// Multiplicative period adjustment, stored in permille so scaling is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadFactor {
    permille: u32,
}

impl LoadFactor {
    /// Leaves periods unchanged.
    pub const UNITY: Self = Self::from_permille(1000);

    /// Create a factor from permille (`1200` = ×1.2).
    #[must_use]
    pub const fn from_permille(permille: u32) -> Self {
        Self { permille }
    }

    /// Factor in permille.
    #[must_use]
    pub const fn permille(self) -> u32 {
        self.permille
    }

    /// Factor as a ratio.
    #[must_use]
    pub fn ratio(self) -> f64 {
        f64::from(self.permille) / 1000.0
    }

    /// Whether this factor leaves periods unchanged.
    #[must_use]
    pub const fn is_unity(self) -> bool {
        self.permille == Self::UNITY.permille
    }

    /// Scale `period`, saturating at `u64::MAX` nanoseconds.
    #[must_use]
    pub fn scale(self, period: Duration) -> Duration {
        let scaled =
            u128::from(saturating_nanos(period)) * u128::from(self.permille) / u128::from(PERMILLE);
        Duration::from_nanos(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

impl Default for LoadFactor {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Load classification driving the period factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadBand {
    /// Load above the high threshold: lengthen periods.
    High,
    /// Load between the thresholds: leave periods alone.
    Normal,
    /// Load below the low threshold: shorten periods.
    Low,
}

/// Adaptive controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Time between control cycles when running on its own thread.
    pub control_interval: Duration,

    /// Load (percent) above which periods are lengthened.
    pub high_load_percent: f64,

    /// Load (percent) below which periods are shortened.
    pub low_load_percent: f64,

    /// Factor applied under high load, in permille.
    pub slow_down_permille: u32,

    /// Factor applied under low load, in permille.
    pub speed_up_permille: u32,

    /// Shortest period the controller will set.
    pub min_period: Duration,

    /// Longest period the controller will set.
    pub max_period: Duration,

    /// EMA alpha for load smoothing [0.01, 1.0]; 1.0 uses raw samples.
    pub load_ema_alpha: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            control_interval: Duration::from_millis(2000),
            high_load_percent: 80.0,
            low_load_percent: 40.0,
            slow_down_permille: 1200,
            speed_up_permille: 800,
            min_period: Duration::from_millis(10),
            max_period: Duration::from_secs(60),
            load_ema_alpha: 1.0,
        }
    }
}

impl AdaptiveConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control interval.
    #[must_use]
    pub fn with_control_interval(mut self, interval: Duration) -> Self {
        self.control_interval = interval;
        self
    }

    /// Set load thresholds (percent).
    #[must_use]
    pub fn with_load_thresholds(mut self, low: f64, high: f64) -> Self {
        self.low_load_percent = low;
        self.high_load_percent = high;
        self
    }

    /// Set slow-down and speed-up factors (permille).
    #[must_use]
    pub fn with_factors(mut self, slow_down_permille: u32, speed_up_permille: u32) -> Self {
        self.slow_down_permille = slow_down_permille;
        self.speed_up_permille = speed_up_permille;
        self
    }

    /// Set period bounds.
    #[must_use]
    pub fn with_period_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_period = min;
        self.max_period = max;
        self
    }

    /// Set the load EMA alpha.
    #[must_use]
    pub fn with_ema_alpha(mut self, alpha: f64) -> Self {
        self.load_ema_alpha = alpha;
        self
    }

    /// Normalize configuration to maintain safe, bounded behavior.
    ///
    /// This ensures:
    /// - `min_period <= max_period`, both non-zero
    /// - thresholds within `[0, 100]` and `low <= high`
    /// - slow-down factor >= 1.0, speed-up factor in `(0, 1.0]`
    /// - EMA alpha in `[0.01, 1.0]`
    /// - non-zero control interval
    pub fn normalize(&mut self) {
        if self.min_period > self.max_period {
            std::mem::swap(&mut self.min_period, &mut self.max_period);
        }
        self.min_period = self.min_period.max(Duration::from_millis(1));
        self.max_period = self.max_period.max(self.min_period);

        self.high_load_percent = finite_or(self.high_load_percent, 80.0).clamp(0.0, 100.0);
        self.low_load_percent = finite_or(self.low_load_percent, 40.0).clamp(0.0, 100.0);
        if self.low_load_percent > self.high_load_percent {
            std::mem::swap(&mut self.low_load_percent, &mut self.high_load_percent);
        }

        self.slow_down_permille = self.slow_down_permille.max(1000);
        self.speed_up_permille = self.speed_up_permille.clamp(1, 1000);

        self.load_ema_alpha = finite_or(self.load_ema_alpha, 1.0).clamp(0.01, 1.0);
        self.control_interval = self.control_interval.max(Duration::from_millis(1));
    }

    /// Check if the configuration is valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.min_period.is_zero()
            && self.max_period >= self.min_period
            && (0.0..=100.0).contains(&self.low_load_percent)
            && (0.0..=100.0).contains(&self.high_load_percent)
            && self.low_load_percent <= self.high_load_percent
            && self.slow_down_permille >= 1000
            && (1..=1000).contains(&self.speed_up_permille)
            && (0.01..=1.0).contains(&self.load_ema_alpha)
            && !self.control_interval.is_zero()
    }

    /// Classify a load sample.
    #[must_use]
    pub fn classify(&self, load_percent: f64) -> LoadBand {
        if load_percent > self.high_load_percent {
            LoadBand::High
        } else if load_percent < self.low_load_percent {
            LoadBand::Low
        } else {
            LoadBand::Normal
        }
    }

    /// Factor applied for a band.
    #[must_use]
    pub fn factor_for(&self, band: LoadBand) -> LoadFactor {
        match band {
            LoadBand::High => LoadFactor::from_permille(self.slow_down_permille),
            LoadBand::Normal => LoadFactor::UNITY,
            LoadBand::Low => LoadFactor::from_permille(self.speed_up_permille),
        }
    }

    /// Scale a period and clamp it to the configured bounds.
    ///
    /// The clamp never moves a period against the factor. A period already
    /// below `min_period` is held there by a speed-up and one already above
    /// `max_period` is held there by a slow-down.
    #[must_use]
    pub fn scaled_period(&self, period: Duration, factor: LoadFactor) -> Duration {
        let scaled = factor.scale(period);
        match factor.permille().cmp(&LoadFactor::UNITY.permille()) {
            Ordering::Less => scaled
                .min(self.max_period)
                .max(self.min_period.min(period)),
            Ordering::Greater => scaled
                .max(self.min_period)
                .min(self.max_period.max(period)),
            Ordering::Equal => period,
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Result of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlOutcome {
    /// The table was rescaled.
    Applied {
        /// Load sample that drove the cycle.
        load_percent: f64,
        /// Band the sample fell into.
        band: LoadBand,
        /// Factor applied.
        factor: LoadFactor,
        /// Jobs whose period changed.
        rescaled: usize,
    },
    /// The table lock was not acquired in time; nothing changed.
    Skipped {
        /// Load sample that drove the cycle.
        load_percent: f64,
    },
}

impl ControlOutcome {
    /// Load sample that drove the cycle.
    #[must_use]
    pub fn load_percent(&self) -> f64 {
        match self {
            Self::Applied { load_percent, .. } | Self::Skipped { load_percent } => *load_percent,
        }
    }

    /// Whether the cycle was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Feedback loop rescaling job periods from load samples.
#[derive(Debug)]
pub struct AdaptiveController<E> {
    config: AdaptiveConfig,
    estimator: E,
}

impl<E: LoadEstimator> AdaptiveController<E> {
    /// Create a controller. The configuration is normalized.
    pub fn new(mut config: AdaptiveConfig, estimator: E) -> Self {
        config.normalize();
        Self { config, estimator }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Run one control cycle against `scheduler`.
    ///
    /// The estimator's sample is published as `cpu_load_percent` before the
    /// table is touched, also when the cycle is skipped. The controller is
    /// the only writer of that field. A busy table lock skips the cycle; the
    /// next cycle retries with a fresh load sample.
    pub fn run_cycle(&mut self, scheduler: &Scheduler) -> ControlOutcome {
        let load_percent = finite_or(self.estimator.sample_load(), 0.0).clamp(0.0, 100.0);
        let metrics = scheduler.metrics();
        metrics.set_cpu_load(load_percent);

        let band = self.config.classify(load_percent);
        if band == LoadBand::High {
            warn!(load_percent, "High CPU load");
        }
        let factor = self.config.factor_for(band);

        match scheduler.rescale_periods(factor, &self.config) {
            Ok(rescaled) => {
                metrics.inc_control_cycle();
                debug!(
                    load_percent,
                    ?band,
                    factor = factor.ratio(),
                    rescaled,
                    "Control cycle applied"
                );
                ControlOutcome::Applied {
                    load_percent,
                    band,
                    factor,
                    rescaled,
                }
            }
            Err(err) => {
                metrics.inc_skipped_control_cycle();
                warn!(load_percent, error = %err, "Control cycle skipped");
                ControlOutcome::Skipped { load_percent }
            }
        }
    }
}

impl<E: LoadEstimator + Send + 'static> AdaptiveController<E> {
    /// Run the controller on its own thread every `control_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller thread cannot be spawned.
    pub fn spawn(mut self, scheduler: Arc<Scheduler>) -> io::Result<ControllerHandle> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let interval = self.config.control_interval;

        let thread = thread::Builder::new()
            .name("adaptive-controller".to_string())
            .spawn(move || {
                info!(
                    interval_ms = interval.as_millis(),
                    "Adaptive controller started"
                );
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_cycle(&scheduler);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Adaptive controller stopped");
            })?;

        Ok(ControllerHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Handle to a running controller thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct ControllerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Whether the controller thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the controller and wait for its thread to exit.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Adaptive controller thread panicked");
            }
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
