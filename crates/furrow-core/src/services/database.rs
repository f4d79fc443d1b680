//! Shared database service wrapper used across clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{broadcast, Mutex};

use crate::db::{
    ConflictRepository, Database, QueueRepository, RecordRepository, SqliteConflictRepository,
    SqliteQueueRepository, SqliteRecordRepository,
};
use crate::models::{
    from_record, record_key, to_record, Conflict, ConflictResolution, Entity, NewOperation,
    QueueOperation, QueueStatus, Record, Table,
};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 256;

/// Change committed to the local store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A record was inserted or replaced
    Upserted { table: Table, record: Record },
    /// A record was removed
    Deleted { table: Table, key: String },
    /// Many rows changed at once; reload the table
    Invalidated { table: Table },
    /// Queue rows were added, removed or changed status
    QueueChanged,
    /// A conflict was raised or resolved
    ConflictsChanged,
}

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path = db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&path))
            .await
            .map_err(|error| Error::Database(error.to_string()))??;
        tracing::info!("Opened local store at {}", db_path.display());

        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            events,
        }
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Subscribe to committed store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run `f` against the connection while holding the lock.
    pub(crate) async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Blocking variant of [`Self::transaction`] for worker threads.
    ///
    /// Must not be called from an async context.
    pub(crate) fn blocking_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let db = self.db.blocking_lock();
        let tx = db.connection().unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a transaction, committing when it returns `Ok`.
    pub(crate) async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------------

    /// Fetch a record by primary key.
    pub async fn get_record(&self, table: Table, key: &str) -> Result<Option<Record>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).get(table, key))
            .await
    }

    /// Every record of a table, in key order.
    pub async fn list_records(&self, table: Table) -> Result<Vec<Record>> {
        self.with_connection(|conn| {
            SqliteRecordRepository::new(conn).list(table, usize::MAX >> 1, 0)
        })
        .await
    }

    /// Page through a table in key order.
    pub async fn list_records_page(
        &self,
        table: Table,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).list(table, limit, offset))
            .await
    }

    pub async fn count_records(&self, table: Table) -> Result<usize> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).count(table))
            .await
    }

    /// Write a record locally without queueing it.
    pub async fn put_record(&self, table: Table, record: Record) -> Result<()> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).put(table, &record))
            .await?;
        self.publish(StoreEvent::Upserted { table, record });
        Ok(())
    }

    /// Delete a record locally without queueing it.
    pub async fn delete_record(&self, table: Table, key: &str) -> Result<bool> {
        let removed = self
            .with_connection(|conn| SqliteRecordRepository::new(conn).delete(table, key))
            .await?;
        if removed {
            self.publish(StoreEvent::Deleted {
                table,
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    /// Write many records locally without queueing them.
    pub async fn bulk_put_records(&self, table: Table, records: Vec<Record>) -> Result<usize> {
        let written = self
            .transaction(|conn| SqliteRecordRepository::new(conn).bulk_put(table, &records))
            .await?;
        self.publish(StoreEvent::Invalidated { table });
        Ok(written)
    }

    /// Write a record and append its queue row in one transaction.
    ///
    /// When the write fails nothing is queued.
    pub async fn put_and_enqueue(
        &self,
        table: Table,
        record: Record,
        operation: NewOperation,
    ) -> Result<QueueOperation> {
        let queued = self
            .transaction(|conn| {
                SqliteRecordRepository::new(conn).put(table, &record)?;
                SqliteQueueRepository::new(conn).append(&operation)
            })
            .await?;
        self.publish(StoreEvent::Upserted { table, record });
        self.publish(StoreEvent::QueueChanged);
        Ok(queued)
    }

    /// Delete a record and append its queue row in one transaction.
    pub async fn delete_and_enqueue(
        &self,
        table: Table,
        key: &str,
        operation: NewOperation,
    ) -> Result<QueueOperation> {
        let queued = self
            .transaction(|conn| {
                if !SqliteRecordRepository::new(conn).delete(table, key)? {
                    return Err(Error::not_found(table, key));
                }
                SqliteQueueRepository::new(conn).append(&operation)
            })
            .await?;
        self.publish(StoreEvent::Deleted {
            table,
            key: key.to_string(),
        });
        self.publish(StoreEvent::QueueChanged);
        Ok(queued)
    }

    /// Fetch a typed entity.
    pub async fn get<T: Entity>(&self, key: &str) -> Result<Option<T>> {
        self.get_record(T::TABLE, key)
            .await?
            .map(from_record)
            .transpose()
    }

    /// Fetch a typed entity that must exist.
    pub async fn require<T: Entity>(&self, key: &str) -> Result<T> {
        self.get(key)
            .await?
            .ok_or_else(|| Error::not_found(T::TABLE, key))
    }

    /// Every entity of a typed table.
    pub async fn list<T: Entity>(&self) -> Result<Vec<T>> {
        self.list_records(T::TABLE)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Write a typed entity locally without queueing it.
    pub async fn put<T: Entity>(&self, entity: &T) -> Result<()> {
        let record = to_record(entity)?;
        debug_assert_eq!(record_key(T::TABLE, &record), Some(entity.key()));
        self.put_record(T::TABLE, record).await
    }

    // ---------------------------------------------------------------------
    // Outbound queue
    // ---------------------------------------------------------------------

    /// Append an operation with no accompanying record write.
    pub async fn append_operation(&self, operation: NewOperation) -> Result<QueueOperation> {
        let queued = self
            .with_connection(|conn| SqliteQueueRepository::new(conn).append(&operation))
            .await?;
        self.publish(StoreEvent::QueueChanged);
        Ok(queued)
    }

    pub async fn queue_list(&self) -> Result<Vec<QueueOperation>> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).list())
            .await
    }

    pub async fn queue_get(&self, id: i64) -> Result<Option<QueueOperation>> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).get(id))
            .await
    }

    pub async fn queue_eligible(&self) -> Result<Vec<QueueOperation>> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).eligible())
            .await
    }

    /// Mark a row in flight. Returns false when the row is gone.
    pub async fn queue_mark_syncing(&self, id: i64) -> Result<bool> {
        let marked = self
            .with_connection(|conn| SqliteQueueRepository::new(conn).mark_syncing(id))
            .await?;
        if marked {
            self.publish(StoreEvent::QueueChanged);
        }
        Ok(marked)
    }

    pub async fn queue_mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: Option<u32>,
    ) -> Result<Option<QueueStatus>> {
        let status = self
            .with_connection(|conn| {
                SqliteQueueRepository::new(conn).mark_failed(id, error, max_attempts)
            })
            .await?;
        if status.is_some() {
            self.publish(StoreEvent::QueueChanged);
        }
        Ok(status)
    }

    pub async fn queue_remove(&self, id: i64) -> Result<bool> {
        let removed = self
            .with_connection(|conn| SqliteQueueRepository::new(conn).remove(id))
            .await?;
        self.publish(StoreEvent::QueueChanged);
        Ok(removed)
    }

    pub async fn queue_unresolved_for(
        &self,
        table: Table,
        entity_id: &str,
    ) -> Result<Vec<QueueOperation>> {
        self.with_connection(|conn| {
            SqliteQueueRepository::new(conn).unresolved_for_entity(table, entity_id)
        })
        .await
    }

    pub async fn queue_outstanding(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).outstanding())
            .await
    }

    pub async fn queue_max_id(&self) -> Result<i64> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).max_id())
            .await
    }

    pub async fn queue_reset_in_flight(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteQueueRepository::new(conn).reset_in_flight())
            .await
    }

    pub async fn queue_requeue_dead(&self) -> Result<usize> {
        let requeued = self
            .with_connection(|conn| SqliteQueueRepository::new(conn).requeue_dead())
            .await?;
        self.publish(StoreEvent::QueueChanged);
        Ok(requeued)
    }

    // ---------------------------------------------------------------------
    // Conflicts
    // ---------------------------------------------------------------------

    /// Open conflicts, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<Conflict>> {
        self.with_connection(|conn| SqliteConflictRepository::new(conn).list())
            .await
    }

    pub async fn get_conflict(&self, entity_id: &str) -> Result<Option<Conflict>> {
        self.with_connection(|conn| SqliteConflictRepository::new(conn).get(entity_id))
            .await
    }

    pub async fn count_conflicts(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteConflictRepository::new(conn).count())
            .await
    }

    /// Recently resolved conflicts, newest first.
    pub async fn list_resolutions(&self, limit: usize) -> Result<Vec<ConflictResolution>> {
        self.with_connection(|conn| SqliteConflictRepository::new(conn).list_resolutions(limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{into_record, Field};
    use serde_json::json;
    use tempfile::tempdir;

    fn field(id: &str, name: &str) -> Record {
        into_record(json!({"id": id, "name": name})).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_put_and_list_roundtrip() {
        let service = DatabaseService::open_in_memory().unwrap();

        service.put_record(Table::Fields, field("f1", "North")).await.unwrap();
        let records = service.list_records(Table::Fields).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "North");

        let typed: Field = service.require("f1").await.unwrap();
        assert_eq!(typed.name, "North");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_queues_nothing() {
        let service = DatabaseService::open_in_memory().unwrap();

        let result = service
            .put_and_enqueue(
                Table::Fields,
                into_record(json!({"name": "no id"})).unwrap(),
                NewOperation::raw("ADD_FIELD", json!({"name": "no id"})),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(service.queue_list().await.unwrap().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_missing_record_queues_nothing() {
        let service = DatabaseService::open_in_memory().unwrap();

        let error = service
            .delete_and_enqueue(Table::Tasks, "ghost", NewOperation::delete(Table::Tasks, "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));
        assert!(service.queue_list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("furrow.db");

        {
            let service = DatabaseService::open_path(&db_path).await.unwrap();
            let record = field("f1", "North");
            service
                .put_and_enqueue(
                    Table::Fields,
                    record.clone(),
                    NewOperation::add(Table::Fields, "f1", &record),
                )
                .await
                .unwrap();
        }

        let reopened = DatabaseService::open_path(&db_path).await.unwrap();
        let queue = reopened.queue_list().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].operation, "ADD_FIELD");
        assert_eq!(queue[0].status, QueueStatus::Pending);
        assert!(reopened.get_record(Table::Fields, "f1").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_publish_events() {
        let service = DatabaseService::open_in_memory().unwrap();
        let mut events = service.subscribe();

        service
            .put_record(Table::Tasks, into_record(json!({"id": "t1"})).unwrap())
            .await
            .unwrap();
        service.delete_record(Table::Tasks, "t1").await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            StoreEvent::Upserted { table: Table::Tasks, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Deleted {
                table: Table::Tasks,
                key: "t1".to_string()
            }
        );
    }
}
