//! Load estimation for the adaptive controller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::timer::DispatchStats;

/// Source of system load samples.
pub trait LoadEstimator {
    /// Sample the current load as a percentage in `[0, 100]`.
    fn sample_load(&mut self) -> f64;
}

impl<E: LoadEstimator + ?Sized> LoadEstimator for Box<E> {
    fn sample_load(&mut self) -> f64 {
        (**self).sample_load()
    }
}

/// Percentage of `wall` spent busy, clamped to `[0, 100]`.
#[must_use]
pub fn utilization_percent(busy: Duration, wall: Duration) -> f64 {
    if wall.is_zero() {
        return 0.0;
    }
    (busy.as_secs_f64() / wall.as_secs_f64() * 100.0).clamp(0.0, 100.0)
}

/// Estimates load as the dispatcher thread's utilization.
///
/// Each sample covers the window since the previous one; the first sample
/// covers the time since the dispatcher started. An EMA with `alpha = 1.0`
/// reports the raw window utilization.
#[derive(Debug)]
pub struct DispatcherLoadEstimator {
    stats: Arc<DispatchStats>,
    last_busy: Duration,
    last_uptime: Duration,
    ema_alpha: f64,
    smoothed: Option<f64>,
}

impl DispatcherLoadEstimator {
    /// Create an estimator reporting raw window utilization.
    #[must_use]
    pub fn new(stats: Arc<DispatchStats>) -> Self {
        Self {
            stats,
            last_busy: Duration::ZERO,
            last_uptime: Duration::ZERO,
            ema_alpha: 1.0,
            smoothed: None,
        }
    }

    /// Smooth samples with an EMA; `alpha` is clamped to `[0.01, 1.0]`.
    #[must_use]
    pub fn with_ema_alpha(mut self, alpha: f64) -> Self {
        self.ema_alpha = if alpha.is_finite() {
            alpha.clamp(0.01, 1.0)
        } else {
            1.0
        };
        self
    }

    fn smooth(&mut self, raw: f64) -> f64 {
        let value = match self.smoothed {
            None => raw,
            Some(previous) => (1.0 - self.ema_alpha) * previous + self.ema_alpha * raw,
        };
        self.smoothed = Some(value);
        value
    }
}

impl LoadEstimator for DispatcherLoadEstimator {
    fn sample_load(&mut self) -> f64 {
        let busy = self.stats.busy_time();
        let uptime = self.stats.uptime();

        let window = uptime.saturating_sub(self.last_uptime);
        let busy_in_window = busy.saturating_sub(self.last_busy);
        self.last_busy = busy;
        self.last_uptime = uptime;

        if window.is_zero() {
            return self.smoothed.unwrap_or(0.0);
        }
        self.smooth(utilization_percent(busy_in_window, window))
    }
}

/// Reports the same load on every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedLoad(pub f64);

impl LoadEstimator for FixedLoad {
    fn sample_load(&mut self) -> f64 {
        self.0.clamp(0.0, 100.0)
    }
}

/// Replays a sequence of samples, then repeats the last one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoad {
    samples: VecDeque<f64>,
    last: f64,
}

impl ScriptedLoad {
    /// Create an estimator replaying `samples` in order.
    #[must_use]
    pub fn new(samples: impl IntoIterator<Item = f64>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            last: 0.0,
        }
    }

    /// Append a sample.
    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
    }

    /// Samples not yet replayed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl LoadEstimator for ScriptedLoad {
    fn sample_load(&mut self) -> f64 {
        if let Some(next) = self.samples.pop_front() {
            self.last = next.clamp(0.0, 100.0);
        }
        self.last
    }
}
