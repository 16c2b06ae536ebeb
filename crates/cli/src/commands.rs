//! One-shot subcommands. Results go to stdout as JSON (NDJSON for
//! streams); diagnostics go to stderr through `tracing`.

use customs_sync_engine::period::{format_day, split};
use customs_sync_engine::{RateSyncMode, SyncOutcome};
use serde::Serialize;
use time::Date;
use tokio::sync::mpsc;

use crate::error::CliError;
use crate::services::Services;

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_line<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn sync_rates(
    services: &Services,
    mode: RateSyncMode,
    progress: bool,
) -> Result<(), CliError> {
    let outcome = services
        .rates
        .run(mode, &|p| {
            if progress {
                eprintln!("{}/{} {}", p.done, p.total, format_day(p.date));
            }
        })
        .await?;
    match outcome {
        SyncOutcome::Completed(report) => print_json(&report),
        SyncOutcome::Locked => Err(CliError::Locked(format!("{mode} rate sync"))),
    }
}

/// Every page is printed as one JSON line, then the totals.
pub async fn backfill_summaries(
    services: &Services,
    batch_size: usize,
    cursor: Option<i64>,
) -> Result<(), CliError> {
    let outcome = services
        .backfill
        .run_to_completion(batch_size, cursor, &|page| {
            if let Ok(line) = serde_json::to_string(page) {
                println!("{line}");
            }
        })
        .await?;
    match outcome {
        SyncOutcome::Completed(totals) => print_line(&totals),
        SyncOutcome::Locked => Err(CliError::Locked("summary backfill".to_string())),
    }
}

pub async fn sync_declarations(
    services: &Services,
    company_id: i64,
    from: Date,
    to: Date,
) -> Result<(), CliError> {
    let syncer = services.declarations()?;
    match syncer.run(company_id, from, to).await? {
        SyncOutcome::Completed(job) => print_json(&job),
        SyncOutcome::Locked => Err(CliError::Locked(format!(
            "declaration sync for company {company_id}"
        ))),
    }
}

pub async fn cancel_job(services: &Services, job_id: i64) -> Result<(), CliError> {
    let job = services.jobs.cancel(job_id).await?;
    print_json(&job)
}

pub async fn show_job(services: &Services, job_id: i64) -> Result<(), CliError> {
    let view = services.jobs.get(job_id).await?;
    print_json(&view)
}

/// Streams audit events to stdout as they are produced.
pub async fn audit_rates(
    services: &Services,
    from: Date,
    to: Date,
    repair: bool,
) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::channel(64);
    let printer = async move {
        while let Some(event) = rx.recv().await {
            print_line(&event)?;
        }
        Ok::<(), CliError>(())
    };

    let (summary, printed) = tokio::join!(services.audit.run(from, to, repair, tx), printer);
    printed?;
    let summary = summary?;
    if summary.errors > 0 {
        tracing::warn!(errors = summary.errors, "some days could not be audited");
    }
    Ok(())
}

/// Print the chunks of a range, one `start<TAB>end` line each.
pub fn split_range(from: Date, to: Date, max_days: u32) {
    for chunk in split(from, to, max_days) {
        println!("{}\t{}", format_day(chunk.start), format_day(chunk.end));
    }
}
