//! In-memory view of one table kept current from store events.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{DatabaseService, StoreEvent};
use crate::models::{record_key, Record, Table};
use crate::Result;

type Rows = Arc<RwLock<BTreeMap<String, Record>>>;

/// Derived copy of a table for fast reads by UI code. Never written to
/// directly; every change flows through the store first.
pub struct TableProjection {
    table: Table,
    rows: Rows,
    task: JoinHandle<()>,
}

impl TableProjection {
    /// Load the table and follow its changes until dropped.
    pub async fn spawn(store: &DatabaseService, table: Table) -> Result<Self> {
        let mut events = store.subscribe();
        let rows: Rows = Arc::default();
        load(store, table, &rows).await?;

        let task = {
            let store = store.clone();
            let rows = Arc::clone(&rows);
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(StoreEvent::Upserted { table: changed, record }) if changed == table => {
                            let key = record_key(table, &record).map(str::to_string);
                            if let Some(key) = key {
                                write(&rows).insert(key, record);
                            }
                        }
                        Ok(StoreEvent::Deleted { table: changed, key }) if changed == table => {
                            write(&rows).remove(&key);
                        }
                        Ok(StoreEvent::Invalidated { table: changed }) if changed == table => {
                            reload(&store, table, &rows).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!("{table} projection lagged by {skipped} event(s)");
                            reload(&store, table, &rows).await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        Ok(Self { table, rows, task })
    }

    pub const fn table(&self) -> Table {
        self.table
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        read(&self.rows).get(key).cloned()
    }

    /// Every row in key order.
    pub fn snapshot(&self) -> Vec<Record> {
        read(&self.rows).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.rows).is_empty()
    }
}

impl Drop for TableProjection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn read(rows: &Rows) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Record>> {
    rows.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(rows: &Rows) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Record>> {
    rows.write().unwrap_or_else(PoisonError::into_inner)
}

async fn load(store: &DatabaseService, table: Table, rows: &Rows) -> Result<()> {
    let fresh = store
        .list_records(table)
        .await?
        .into_iter()
        .filter_map(|record| {
            record_key(table, &record)
                .map(str::to_string)
                .map(|key| (key, record))
        })
        .collect();
    *write(rows) = fresh;
    Ok(())
}

async fn reload(store: &DatabaseService, table: Table, rows: &Rows) {
    if let Err(error) = load(store, table, rows).await {
        tracing::error!("Failed to reload {table} projection: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::into_record;
    use serde_json::json;
    use std::time::Duration;

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("projection never caught up");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn follows_writes_to_its_table_only() {
        let store = DatabaseService::open_in_memory().unwrap();
        store
            .put_record(Table::Tasks, into_record(json!({"id": "t1", "title": "a"})).unwrap())
            .await
            .unwrap();

        let projection = TableProjection::spawn(&store, Table::Tasks).await.unwrap();
        assert_eq!(projection.len(), 1);

        store
            .put_record(Table::Tasks, into_record(json!({"id": "t2", "title": "b"})).unwrap())
            .await
            .unwrap();
        store
            .put_record(Table::Fields, into_record(json!({"id": "f1"})).unwrap())
            .await
            .unwrap();
        store.delete_record(Table::Tasks, "t1").await.unwrap();

        eventually(|| projection.get("t2").is_some() && projection.get("t1").is_none()).await;
        assert_eq!(projection.len(), 1);
        assert!(projection.get("f1").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_writes_trigger_a_reload() {
        let store = DatabaseService::open_in_memory().unwrap();
        let projection = TableProjection::spawn(&store, Table::Animals).await.unwrap();
        assert!(projection.is_empty());

        let records = (0..5)
            .map(|n| into_record(json!({"id": format!("a{n}")})).unwrap())
            .collect();
        store.bulk_put_records(Table::Animals, records).await.unwrap();

        eventually(|| projection.len() == 5).await;
    }
}
