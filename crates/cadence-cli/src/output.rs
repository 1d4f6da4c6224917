//! Output formatting for CLI responses

use anyhow::Error;
use cadence_scheduler::{JobSnapshot, SystemMetrics};
use colored::Colorize;
use serde_json::json;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print one metrics report.
pub fn print_report(
    elapsed_secs: f64,
    metrics: &SystemMetrics,
    jobs: Option<&[JobSnapshot]>,
    json: bool,
) {
    if json {
        let output = json!({
            "success": true,
            "elapsed_secs": elapsed_secs,
            "metrics": metrics,
            "jobs": jobs,
        });
        match serde_json::to_string(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to format report as JSON: {e}"),
        }
        return;
    }

    println!(
        "{} t={:.1}s jobs={} load={:.1}% avg={:.0}us missed={}/{} ({:.1}%)",
        "report".bold(),
        elapsed_secs,
        metrics.job_count,
        metrics.cpu_load_percent,
        metrics.average_execution_us,
        metrics.missed_deadlines,
        metrics.total_invocations,
        metrics.missed_deadline_rate(),
    );

    let Some(jobs) = jobs else {
        println!("  {}", "job table busy, per-job view skipped".yellow());
        return;
    };
    for job in jobs {
        let state = if job.armed {
            "armed".green()
        } else {
            "unarmed".red()
        };
        println!(
            "  {:<15} period={:>7.1}ms deadline={:>5}ms runs={:<6} missed={:<6} {}",
            job.name.bold(),
            job.period.as_secs_f64() * 1000.0,
            job.deadline.as_millis(),
            job.invocations,
            job.missed_deadlines,
            state,
        );
    }
}
