//! One orchestrator pass from the command line: `appfoundry cycle`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use appfoundry::config::AppConfig;
use appfoundry::factory::api::AppState;
use appfoundry::factory::db::DbHandle;
use appfoundry::factory::llm::GeminiClient;
use appfoundry::factory::orchestrator::PassReport;
use appfoundry::factory::scheduler::Settlement;

use super::db::open_existing;

pub async fn cmd_cycle(config: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let db = DbHandle::new(open_existing(path)?);
    let generator =
        GeminiClient::new(&config.generation).context("Failed to build text generation client")?;
    let state = AppState::new(db, Arc::new(generator), config);

    let report = state.orchestrator.run_pass(Utc::now()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PassReport) {
    if report.swept > 0 {
        println!(
            "{} {} stale build(s)",
            console::style("Failed").yellow(),
            report.swept
        );
    }
    for outcome in &report.outcomes {
        let next = outcome.next_run.format("%Y-%m-%d %H:%M");
        match &outcome.settlement {
            Settlement::Success { artifact_id } => println!(
                "  {} job {} built app {} (next run {})",
                console::style("✓").green(),
                outcome.job_id,
                artifact_id,
                next
            ),
            Settlement::Failure { reason } => println!(
                "  {} job {}: {} (retry {})",
                console::style("✗").red(),
                outcome.job_id,
                reason,
                next
            ),
        }
    }
    for job_id in &report.skipped {
        println!(
            "  {} job {} is leased by another pass",
            console::style("-").dim(),
            job_id
        );
    }
    for error in &report.errors {
        println!("  {} {}", console::style("Error:").red().bold(), error);
    }
    println!("Processed {} cron jobs", report.processed());
}
