use furrow_core::worker::{BulkWorker, WorkerEvent};
use tokio::sync::mpsc;

use crate::cli::StressCommands;
use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_stress(command: StressCommands, ctx: &Context) -> Result<(), CliError> {
    let worker = BulkWorker::new(ctx.open_store().await?);
    let events = match command {
        StressCommands::Insert { count } => worker.stress_test_insert(count),
        StressCommands::Clear => worker.clear_stress_test_data(),
    };
    follow_progress(events).await
}

/// Print progress until the job reports its final event.
pub async fn follow_progress(mut events: mpsc::Receiver<WorkerEvent>) -> Result<(), CliError> {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Progress { message, .. } => eprintln!("{message}"),
            WorkerEvent::Finished { message, .. } => {
                println!("{message}");
                return Ok(());
            }
            WorkerEvent::Failed(error) => return Err(CliError::Worker(error)),
        }
    }
    Err(CliError::Worker("job ended without a result".to_string()))
}
