//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activator::ActivationConfig;
use crate::adaptive::AdaptiveConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::workload::SimulatedWorkload;

/// Default number of job slots.
pub const DEFAULT_CAPACITY: usize = 10;

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed number of job slots.
    pub capacity: usize,
    /// Budget for acquiring the job table lock.
    pub lock_timeout: Duration,
    /// Timeout for timer commands other than `start`.
    pub command_timeout: Duration,
    /// Retry policy for starting job timers.
    pub activation: ActivationConfig,
    /// Adaptive controller settings.
    pub adaptive: AdaptiveConfig,
    /// Default unit of work run by job callbacks.
    pub workload: SimulatedWorkload,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            lock_timeout: Duration::from_millis(100),
            command_timeout: Duration::from_millis(100),
            activation: ActivationConfig::default(),
            adaptive: AdaptiveConfig::default(),
            workload: SimulatedWorkload::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.capacity == 0 {
            return Err(SchedulerError::invalid_configuration(
                "capacity must be greater than 0",
            ));
        }
        if u32::try_from(self.capacity).is_err() {
            return Err(SchedulerError::invalid_configuration(
                "capacity must fit in 32 bits",
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(SchedulerError::invalid_configuration(
                "lock_timeout must be greater than 0",
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(SchedulerError::invalid_configuration(
                "command_timeout must be greater than 0",
            ));
        }
        if self.activation.max_attempts == 0 {
            return Err(SchedulerError::invalid_configuration(
                "activation.max_attempts must be greater than 0",
            ));
        }
        if !self.adaptive.is_valid() {
            return Err(SchedulerError::invalid_configuration(
                "adaptive configuration out of range",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

/// Builder for `SchedulerConfig`.
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Set the number of job slots.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the table lock budget.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the timer command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the timer activation policy.
    #[must_use]
    pub fn activation(mut self, activation: ActivationConfig) -> Self {
        self.config.activation = activation;
        self
    }

    /// Set the adaptive controller settings.
    #[must_use]
    pub fn adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.config.adaptive = adaptive;
        self
    }

    /// Set the simulated workload.
    #[must_use]
    pub fn workload(mut self, workload: SimulatedWorkload) -> Self {
        self.config.workload = workload;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> SchedulerResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.lock_timeout, Duration::from_millis(100));
        assert_eq!(config.activation.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = SchedulerConfig::builder().capacity(0).build();
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(
            SchedulerConfig::builder()
                .lock_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            SchedulerConfig::builder()
                .command_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_invalid_adaptive_rejected() {
        let adaptive = AdaptiveConfig::default().with_load_thresholds(90.0, 10.0);
        let err = SchedulerConfig::builder()
            .adaptive(adaptive)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("adaptive"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let activation = ActivationConfig {
            max_attempts: 0,
            ..ActivationConfig::default()
        };
        assert!(SchedulerConfig::builder().activation(activation).build().is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SchedulerConfig::builder()
            .capacity(4)
            .lock_timeout(Duration::from_millis(20))
            .command_timeout(Duration::from_millis(30))
            .build()
            .unwrap();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.lock_timeout, Duration::from_millis(20));
        assert_eq!(config.command_timeout, Duration::from_millis(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"capacity": 3}"#).unwrap();
        assert_eq!(config.capacity, 3);
        assert_eq!(config.adaptive, AdaptiveConfig::default());
    }
}
