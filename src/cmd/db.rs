//! Database commands: `init-db`, `status`, `reset-schedule`.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::path::Path;

use appfoundry::factory::db::FactoryDb;
use appfoundry::factory::models::JobStatus;

/// Open an existing database. Commands other than `init-db` never create one.
pub fn open_existing(path: &Path) -> Result<FactoryDb> {
    if !path.exists() {
        bail!(
            "Database not found at {}. Run 'appfoundry init-db' first.",
            path.display()
        );
    }
    FactoryDb::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

pub fn cmd_init_db(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    FactoryDb::new(path)?;
    println!("Database initialized at {}", path.display());
    Ok(())
}

fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn cmd_status(path: &Path) -> Result<()> {
    let db = open_existing(path)?;
    let jobs = db.list_jobs()?;

    if jobs.is_empty() {
        println!("No jobs scheduled. Save a configuration with an API key first.");
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<8} {:<10} {:<10} {:<18} {:<18} Error",
        "Job", "Config", "Status", "Interval", "Last run", "Next run"
    );
    println!(
        "{:<6} {:<8} {:<10} {:<10} {:<18} {:<18} -----",
        "---", "------", "------", "--------", "--------", "--------"
    );
    let now = Utc::now();
    for summary in &jobs {
        let job = &summary.job;
        let status = match job.status {
            JobStatus::Active => console::style(job.status.as_str()).green(),
            JobStatus::Disabled => console::style(job.status.as_str()).dim(),
        };
        let next = fmt_time(job.next_run);
        let next = if job.next_run.is_none_or(|t| t <= now) {
            console::style(format!("{:<18}", next)).yellow()
        } else {
            console::style(format!("{:<18}", next))
        };
        println!(
            "{:<6} {:<8} {:<10} {:<10} {:<18} {} {}",
            job.id,
            job.config_id,
            status,
            format!("{}m", summary.interval_minutes),
            fmt_time(job.last_run),
            next,
            job.error_message
                .as_deref()
                .map(|e| console::style(e).red().to_string())
                .unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

pub fn cmd_reset_schedule(path: &Path) -> Result<()> {
    let db = open_existing(path)?;
    let reset = db.reset_jobs(Utc::now())?;
    println!(
        "{} {} job(s); they are due now.",
        console::style("Reset").green().bold(),
        reset
    );
    Ok(())
}
