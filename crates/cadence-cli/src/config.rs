//! Run configuration: scheduler settings plus the job set to register.

use std::fs;
use std::path::Path;

use cadence_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// One job to register at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub period_ms: u32,
    #[serde(default)]
    pub priority: u8,
    pub deadline_ms: u32,
}

impl JobConfig {
    fn new(name: &str, period_ms: u32, priority: u8, deadline_ms: u32) -> Self {
        Self {
            name: name.to_string(),
            period_ms,
            priority,
            deadline_ms,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub scheduler: SchedulerConfig,
    pub jobs: Vec<JobConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            jobs: vec![
                JobConfig::new("A", 500, 1, 200),
                JobConfig::new("B", 800, 3, 400),
                JobConfig::new("C", 1000, 5, 500),
            ],
        }
    }
}

impl RunConfig {
    /// Load a configuration file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check scheduler settings and the job list.
    pub fn validate(&self) -> Result<(), CliError> {
        self.scheduler.validate()?;

        if self.jobs.len() > self.scheduler.capacity {
            return Err(CliError::InvalidConfiguration(format!(
                "{} jobs configured but capacity is {}",
                self.jobs.len(),
                self.scheduler.capacity
            )));
        }
        if let Some(job) = self.jobs.iter().find(|job| job.period_ms == 0) {
            return Err(CliError::InvalidConfiguration(format!(
                "job '{}' has a zero period",
                job.name
            )));
        }
        Ok(())
    }
}
