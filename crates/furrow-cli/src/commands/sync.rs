use std::time::Duration;

use furrow_core::models::ConflictChoice;
use furrow_core::sync::{DrainReport, ReconcileReport, SkipReason};
use furrow_core::SyncSnapshot;
use serde::Serialize;

use crate::commands::common::{
    format_conflict_lines, format_resolution_lines, format_snapshot, print_json, short_id, Context,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncOutcome {
    pub drain: DrainReport,
    pub reconcile: Option<ReconcileReport>,
    pub snapshot: SyncSnapshot,
}

pub async fn run_sync(push_only: bool, ctx: &Context) -> Result<(), CliError> {
    let manager = ctx.open_sync().await?;
    manager.start().await?;

    let drain = manager.drain().await;
    let reconcile = if push_only {
        None
    } else {
        Some(manager.reconcile().await)
    };
    manager.refresh_snapshot().await;
    let outcome = SyncOutcome {
        drain,
        reconcile,
        snapshot: manager.snapshot(),
    };

    if ctx.json {
        return print_json(&outcome);
    }

    println!("{}", format_drain_report(&outcome.drain));
    if let Some(report) = outcome.reconcile.as_ref() {
        println!("{}", format_reconcile_report(report));
    }
    println!("{}", format_snapshot(&outcome.snapshot));
    Ok(())
}

pub async fn run_watch(interval_secs: Option<u64>, ctx: &Context) -> Result<(), CliError> {
    let mut sync_config = ctx.config.sync_config();
    if let Some(secs) = interval_secs.filter(|secs| *secs > 0) {
        sync_config = sync_config.with_sync_interval(Duration::from_secs(secs));
    }
    let interval = sync_config.sync_interval;
    let manager = ctx.open_sync_with(sync_config).await?;

    let mut updates = manager.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            println!("{}", format_snapshot(&snapshot));
        }
    });

    println!("Syncing every {}s, press Ctrl-C to stop", interval.as_secs());
    let result = manager
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {error}");
            }
        })
        .await;
    printer.abort();
    result.map_err(CliError::from)
}

pub async fn run_conflicts(resolved: bool, limit: usize, ctx: &Context) -> Result<(), CliError> {
    let store = ctx.open_store().await?;

    if resolved {
        let resolutions = store.list_resolutions(limit).await?;
        if ctx.json {
            return print_json(&resolutions);
        }
        if resolutions.is_empty() {
            println!("No resolved conflicts recorded.");
        }
        for line in format_resolution_lines(&resolutions) {
            println!("{line}");
        }
        return Ok(());
    }

    let conflicts = store.list_conflicts().await?;
    if ctx.json {
        return print_json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("No open conflicts.");
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(id: &str, choice: ConflictChoice, ctx: &Context) -> Result<(), CliError> {
    let farm = ctx.open_farm().await?;
    let resolution = farm.resolve_conflict(id.trim(), choice).await?;

    if ctx.json {
        return print_json(&resolution);
    }
    println!(
        "Kept {} copy of {} {}",
        resolution.choice,
        resolution.table,
        short_id(&resolution.entity_id)
    );
    Ok(())
}

pub fn format_drain_report(report: &DrainReport) -> String {
    match report.skipped {
        Some(SkipReason::AlreadyRunning) => {
            return "Push skipped: a drain is already running".into()
        }
        Some(SkipReason::Offline) => return "Push skipped: offline".into(),
        None => {}
    }

    let mut line = format!(
        "Pushed {} operation(s) in {} pass(es)",
        report.pushed, report.passes
    );
    if report.local_only > 0 {
        line.push_str(&format!(", {} local only", report.local_only));
    }
    if report.failed > 0 {
        line.push_str(&format!(", {} failed", report.failed));
    }
    if report.dead > 0 {
        line.push_str(&format!(", {} dead", report.dead));
    }
    if report.interrupted {
        line.push_str(" (interrupted)");
    }
    line
}

pub fn format_reconcile_report(report: &ReconcileReport) -> String {
    let mut line = format!(
        "Pulled: {} applied, {} conflict(s), {} unchanged",
        report.applied, report.conflicts, report.unchanged
    );
    if !report.failed_resources.is_empty() {
        let failed = report
            .failed_resources
            .iter()
            .map(|resource| resource.name())
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!("; failed: {failed}"));
    }
    line
}
