//! Bulk data generation and cleanup off the async runtime.
//!
//! Work runs in batches on blocking threads. The store lock is taken per
//! batch so interactive calls interleave between batches.

use tokio::sync::mpsc;

use crate::db::{RecordRepository, SqliteRecordRepository};
use crate::models::{new_id, to_record, Animal, Record, Table};
use crate::services::{DatabaseService, StoreEvent};
use crate::{Error, Result};

/// Rows written or deleted per batch
pub const BATCH_SIZE: usize = 10_000;

/// Key prefix of generated rows
pub const STRESS_PREFIX: &str = "stress-";

const STRESS_TABLE: Table = Table::Animals;
const EVENT_CAPACITY: usize = 64;

/// Progress of a bulk job. The last event is always `Finished` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Progress { message: String, done: usize },
    Finished { message: String, rows: usize },
    Failed(String),
}

impl WorkerEvent {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

#[derive(Clone)]
pub struct BulkWorker {
    store: DatabaseService,
}

impl BulkWorker {
    pub const fn new(store: DatabaseService) -> Self {
        Self { store }
    }

    /// Insert `count` synthetic animals. Generated rows are never queued.
    pub fn stress_test_insert(&self, count: usize) -> mpsc::Receiver<WorkerEvent> {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut done = 0;
            while done < count {
                let size = BATCH_SIZE.min(count - done);
                let batch_store = store.clone();
                let written = tokio::task::spawn_blocking(move || {
                    let records = synthetic_animals(size)?;
                    batch_store.blocking_transaction(|conn| {
                        SqliteRecordRepository::new(conn).bulk_put(STRESS_TABLE, &records)
                    })
                })
                .await
                .map_err(|error| Error::Database(error.to_string()))
                .and_then(|result| result);

                match written {
                    Ok(written) => done += written,
                    Err(error) => {
                        tracing::error!("Stress insert failed after {done} rows: {error}");
                        store.publish(StoreEvent::Invalidated { table: STRESS_TABLE });
                        let _ = events.send(WorkerEvent::Failed(error.to_string())).await;
                        return;
                    }
                }

                let _ = events
                    .send(WorkerEvent::Progress {
                        message: format!("Inserted {done} of {count} rows"),
                        done,
                    })
                    .await;
                tokio::task::yield_now().await;
            }

            store.publish(StoreEvent::Invalidated { table: STRESS_TABLE });
            tracing::info!("Stress insert wrote {done} rows");
            let _ = events
                .send(WorkerEvent::Finished {
                    message: format!("Inserted {done} rows"),
                    rows: done,
                })
                .await;
        });

        receiver
    }

    /// Delete every generated row, batch by batch.
    pub fn clear_stress_test_data(&self) -> mpsc::Receiver<WorkerEvent> {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut removed = 0;
            loop {
                let batch_store = store.clone();
                let deleted = tokio::task::spawn_blocking(move || {
                    batch_store.blocking_transaction(|conn| {
                        SqliteRecordRepository::new(conn).delete_by_key_prefix(
                            STRESS_TABLE,
                            STRESS_PREFIX,
                            BATCH_SIZE,
                        )
                    })
                })
                .await
                .map_err(|error| Error::Database(error.to_string()))
                .and_then(|result| result);

                match deleted {
                    Ok(0) => break,
                    Ok(deleted) => removed += deleted,
                    Err(error) => {
                        tracing::error!("Stress cleanup failed after {removed} rows: {error}");
                        store.publish(StoreEvent::Invalidated { table: STRESS_TABLE });
                        let _ = events.send(WorkerEvent::Failed(error.to_string())).await;
                        return;
                    }
                }

                let _ = events
                    .send(WorkerEvent::Progress {
                        message: format!("Deleted {removed} rows"),
                        done: removed,
                    })
                    .await;
                tokio::task::yield_now().await;
            }

            store.publish(StoreEvent::Invalidated { table: STRESS_TABLE });
            tracing::info!("Stress cleanup removed {removed} rows");
            let _ = events
                .send(WorkerEvent::Finished {
                    message: format!("Deleted {removed} rows"),
                    rows: removed,
                })
                .await;
        });

        receiver
    }
}

fn synthetic_animals(count: usize) -> Result<Vec<Record>> {
    (0..count)
        .map(|n| {
            let mut animal = Animal::new(format!("STRESS-{n:05}"), "cattle");
            animal.id = format!("{STRESS_PREFIX}{}", new_id());
            animal.weight_kg = Some(400.0);
            to_record(&animal)
        })
        .collect()
}
