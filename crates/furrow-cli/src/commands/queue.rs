use furrow_core::models::{QueueOperation, QueueStatus};
use serde::Serialize;

use crate::commands::common::{format_queue_lines, print_json, Context};
use crate::error::CliError;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueSummary {
    pub fn from_operations(operations: &[QueueOperation]) -> Self {
        operations
            .iter()
            .fold(Self::default(), |mut summary, operation| {
                match operation.status {
                    QueueStatus::Pending => summary.pending += 1,
                    QueueStatus::Syncing => summary.syncing += 1,
                    QueueStatus::Failed => summary.failed += 1,
                    QueueStatus::Dead => summary.dead += 1,
                }
                summary
            })
    }
}

pub async fn run_queue(ctx: &Context) -> Result<(), CliError> {
    let store = ctx.open_store().await?;
    let operations = store.queue_list().await?;

    if ctx.json {
        return print_json(&operations);
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&operations) {
        println!("{line}");
    }
    let summary = QueueSummary::from_operations(&operations);
    println!(
        "{} pending, {} syncing, {} failed, {} dead",
        summary.pending, summary.syncing, summary.failed, summary.dead
    );
    Ok(())
}

pub async fn run_requeue(ctx: &Context) -> Result<(), CliError> {
    let farm = ctx.open_farm().await?;
    let requeued = farm.sync().requeue_dead().await?;
    println!("Requeued {requeued} operation(s)");
    Ok(())
}
