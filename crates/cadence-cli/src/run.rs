//! `cadence run`: drive the configured job set on the threaded dispatcher.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cadence_scheduler::{
    AdaptiveController, DispatchTimerService, DispatcherLoadEstimator, Scheduler,
};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::CliError;
use crate::output;

/// Options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub duration: Duration,
    pub report_interval: Duration,
    pub json: bool,
}

pub fn execute(config: &RunConfig, options: &RunOptions) -> Result<()> {
    config.validate()?;

    let dispatcher =
        Arc::new(DispatchTimerService::spawn().context("failed to spawn timer dispatcher")?);
    let scheduler = Arc::new(
        Scheduler::new(config.scheduler, dispatcher.clone()).map_err(CliError::from)?,
    );

    for job in &config.jobs {
        match scheduler.register(&job.name, job.period_ms, job.priority, job.deadline_ms) {
            Ok(handle) => info!(job = %job.name, %handle, "Job scheduled"),
            // Registered but unarmed: keep running with the rest of the set.
            Err(err) if err.is_recoverable() && err.job_handle().is_some() => {
                warn!(job = %job.name, error = %err, "Job registered without a running timer");
            }
            Err(err) => return Err(CliError::from(err).into()),
        }
    }

    let adaptive = config.scheduler.adaptive;
    let estimator =
        DispatcherLoadEstimator::new(dispatcher.stats()).with_ema_alpha(adaptive.load_ema_alpha);
    let controller = AdaptiveController::new(adaptive, estimator)
        .spawn(Arc::clone(&scheduler))
        .context("failed to spawn adaptive controller")?;

    let started = Instant::now();
    let report_interval = options.report_interval.max(Duration::from_millis(1));
    loop {
        let remaining = options.duration.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(report_interval.min(remaining));
        report(&scheduler, started, options.json);
    }

    controller.stop();
    dispatcher.shutdown();
    info!(
        elapsed_ms = started.elapsed().as_millis(),
        "Run finished"
    );

    report(&scheduler, started, options.json);
    Ok(())
}

fn report(scheduler: &Scheduler, started: Instant, json: bool) {
    let jobs = scheduler.jobs().ok();
    output::print_report(
        started.elapsed().as_secs_f64(),
        &scheduler.snapshot(),
        jobs.as_deref(),
        json,
    );
}
