//! Outbound queue repository

use crate::error::Result;
use crate::models::{NewOperation, QueueOperation, QueueStatus, Table};
use crate::util::now_timestamp;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str =
    "id, operation, data, timestamp, status, entity_table, entity_id, attempts, last_error";

/// Matches rows for an entity of table `?2`, including rows written before
/// entity ids were recorded explicitly
const ENTITY_MATCH: &str = "(entity_table IS NULL OR entity_table = ?2)
    AND (entity_id = ?1 OR (entity_id IS NULL AND (
        json_extract(data, '$.id') = ?1
        OR json_extract(data, '$.updates.id') = ?1
        OR json_extract(data, '$.fieldId') = ?1
        OR json_extract(data, '$.batchId') = ?1)))";

/// Trait for outbound queue storage operations
pub trait QueueRepository {
    /// Append a pending operation
    fn append(&self, operation: &NewOperation) -> Result<QueueOperation>;

    /// Get a queue row by id
    fn get(&self, id: i64) -> Result<Option<QueueOperation>>;

    /// All rows in insertion order
    fn list(&self) -> Result<Vec<QueueOperation>>;

    /// Rows a drain should push (`pending` or `failed`) in insertion order
    fn eligible(&self) -> Result<Vec<QueueOperation>>;

    /// Returns false when the row no longer exists
    fn mark_syncing(&self, id: i64) -> Result<bool>;

    /// Record a rejected push. The row becomes `dead` once `attempts`
    /// reaches `max_attempts`, `failed` otherwise. `None` when the row was
    /// removed while its push was in flight.
    fn mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: Option<u32>,
    ) -> Result<Option<QueueStatus>>;

    /// Remove an acknowledged row
    fn remove(&self, id: i64) -> Result<bool>;

    /// Remove every row targeting the entity
    fn remove_for_entity(&self, table: Table, entity_id: &str) -> Result<usize>;

    /// Rows for the entity that have not reached the remote yet
    fn unresolved_for_entity(
        &self,
        table: Table,
        entity_id: &str,
    ) -> Result<Vec<QueueOperation>>;

    /// Number of `pending`, `syncing` and `failed` rows
    fn outstanding(&self) -> Result<usize>;

    /// Highest queued row id, 0 when the queue is empty
    fn max_id(&self) -> Result<i64>;

    /// Return rows stuck in `syncing` (interrupted drain) to `pending`
    fn reset_in_flight(&self) -> Result<usize>;

    /// Give `dead` rows a fresh retry budget
    fn requeue_dead(&self) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queue row. Corrupt payloads and unknown statuses or tables
    /// surface as conversion errors.
    fn parse_operation(row: &Row<'_>) -> rusqlite::Result<QueueOperation> {
        let data: String = row.get(2)?;
        let status: String = row.get(4)?;
        let entity_table: Option<String> = row.get(5)?;
        Ok(QueueOperation {
            id: row.get(0)?,
            operation: row.get(1)?,
            data: serde_json::from_str(&data).map_err(|err| conversion_error(2, err))?,
            timestamp: row.get(3)?,
            status: status.parse().map_err(|err| conversion_error(4, err))?,
            entity_table: entity_table
                .map(|name| name.parse::<Table>())
                .transpose()
                .map_err(|err| conversion_error(5, err))?,
            entity_id: row.get(6)?,
            attempts: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<QueueOperation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn append(&self, operation: &NewOperation) -> Result<QueueOperation> {
        let timestamp = now_timestamp();
        self.conn.execute(
            "INSERT INTO sync_queue
                (operation, data, timestamp, status, entity_table, entity_id, attempts)
             VALUES (?, ?, ?, 'pending', ?, ?, 0)",
            params![
                operation.operation,
                serde_json::to_string(&operation.data)?,
                timestamp,
                operation.entity_table.map(|table| table.name()),
                operation.entity_id,
            ],
        )?;

        Ok(QueueOperation {
            id: self.conn.last_insert_rowid(),
            operation: operation.operation.clone(),
            data: operation.data.clone(),
            timestamp,
            status: QueueStatus::Pending,
            entity_table: operation.entity_table,
            entity_id: operation.entity_id.clone(),
            attempts: 0,
            last_error: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<QueueOperation>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM sync_queue WHERE id = ?"),
                params![id],
                Self::parse_operation,
            )
            .optional()?)
    }

    fn list(&self) -> Result<Vec<QueueOperation>> {
        self.query(
            &format!("SELECT {SELECT_COLUMNS} FROM sync_queue ORDER BY id"),
            [],
        )
    }

    fn eligible(&self) -> Result<Vec<QueueOperation>> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM sync_queue
                 WHERE status IN ('pending', 'failed')
                 ORDER BY id"
            ),
            [],
        )
    }

    fn mark_syncing(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'syncing' WHERE id = ?",
            params![id],
        )?;
        Ok(rows > 0)
    }

    fn mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: Option<u32>,
    ) -> Result<Option<QueueStatus>> {
        let Some(attempts) = self
            .conn
            .query_row(
                "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?
                 WHERE id = ? RETURNING attempts",
                params![error, id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?
        else {
            return Ok(None);
        };

        let status = match max_attempts {
            Some(max) if attempts >= max => QueueStatus::Dead,
            _ => QueueStatus::Failed,
        };
        self.conn.execute(
            "UPDATE sync_queue SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Ok(Some(status))
    }

    fn remove(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    fn remove_for_entity(&self, table: Table, entity_id: &str) -> Result<usize> {
        Ok(self.conn.execute(
            &format!("DELETE FROM sync_queue WHERE {ENTITY_MATCH}"),
            params![entity_id, table.name()],
        )?)
    }

    fn unresolved_for_entity(
        &self,
        table: Table,
        entity_id: &str,
    ) -> Result<Vec<QueueOperation>> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM sync_queue
                 WHERE status IN ('pending', 'syncing', 'failed') AND {ENTITY_MATCH}
                 ORDER BY id"
            ),
            params![entity_id, table.name()],
        )
    }

    fn outstanding(&self) -> Result<usize> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'syncing', 'failed')",
            [],
            |row| row.get(0),
        )?)
    }

    fn max_id(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM sync_queue",
            [],
            |row| row.get(0),
        )?)
    }

    fn reset_in_flight(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE status = 'syncing'",
            [],
        )?)
    }

    fn requeue_dead(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE sync_queue SET status = 'pending', attempts = 0 WHERE status = 'dead'",
            [],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Record;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn field(id: &str) -> Record {
        crate::models::into_record(json!({"id": id, "name": "North"})).unwrap()
    }

    #[test]
    fn test_append_and_list_in_order() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = repo
            .append(&NewOperation::add(Table::Fields, "f1", &field("f1")))
            .unwrap();
        let second = repo
            .append(&NewOperation::update(Table::Fields, "f1", &field("f1")))
            .unwrap();

        let rows = repo.list().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, first.id);
        assert_eq!(rows[1].id, second.id);
        assert_eq!(rows[1].operation, "UPDATE_FIELD");
        assert_eq!(rows[1].status, QueueStatus::Pending);
        assert_eq!(rows[1].entity_table, Some(Table::Fields));
    }

    #[test]
    fn test_failed_rows_stay_eligible_until_dead() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let row = repo
            .append(&NewOperation::delete(Table::Tasks, "t1"))
            .unwrap();

        assert!(repo.mark_syncing(row.id).unwrap());
        assert!(repo.eligible().unwrap().is_empty());

        let status = repo.mark_failed(row.id, "HTTP 500", Some(2)).unwrap();
        assert_eq!(status, Some(QueueStatus::Failed));
        assert_eq!(repo.eligible().unwrap().len(), 1);

        let status = repo.mark_failed(row.id, "HTTP 500", Some(2)).unwrap();
        assert_eq!(status, Some(QueueStatus::Dead));
        assert!(repo.eligible().unwrap().is_empty());
        assert_eq!(repo.outstanding().unwrap(), 0);

        let stored = repo.get(row.id).unwrap().unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 500"));

        assert_eq!(repo.requeue_dead().unwrap(), 1);
        let stored = repo.get(row.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[test]
    fn test_no_retry_cap_keeps_failing_forever() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let row = repo
            .append(&NewOperation::delete(Table::Tasks, "t1"))
            .unwrap();

        for _ in 0..20 {
            assert_eq!(
                repo.mark_failed(row.id, "timeout", None).unwrap(),
                Some(QueueStatus::Failed)
            );
        }
    }

    #[test]
    fn test_entity_lookup_covers_legacy_payloads() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.append(&NewOperation::update(Table::Fields, "x", &field("x"))).unwrap();
        repo.append(&NewOperation::raw(
            "TOGGLE_IRRIGATION",
            json!({"fieldId": "x", "on": true}),
        ))
        .unwrap();
        db.connection()
            .execute(
                "INSERT INTO sync_queue (operation, data, timestamp, status)
                 VALUES ('UPDATE_FIELD', '{\"id\":\"x\",\"updates\":{\"id\":\"x\"}}',
                         '2024-01-01T00:00:00.000Z', 'failed')",
                [],
            )
            .unwrap();
        repo.append(&NewOperation::delete(Table::Fields, "y")).unwrap();

        assert_eq!(repo.unresolved_for_entity(Table::Fields, "x").unwrap().len(), 3);
        assert_eq!(repo.remove_for_entity(Table::Fields, "x").unwrap(), 3);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_entity_lookup_is_scoped_to_table() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let task = crate::models::into_record(json!({"id": "x", "title": "Fence"})).unwrap();
        repo.append(&NewOperation::add(Table::Tasks, "x", &task)).unwrap();

        assert!(repo.unresolved_for_entity(Table::Fields, "x").unwrap().is_empty());
        assert_eq!(repo.remove_for_entity(Table::Fields, "x").unwrap(), 0);
        assert_eq!(repo.unresolved_for_entity(Table::Tasks, "x").unwrap().len(), 1);
    }

    #[test]
    fn test_vanished_row_is_settled() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let row = repo.append(&NewOperation::delete(Table::Tasks, "t")).unwrap();
        assert!(repo.mark_syncing(row.id).unwrap());
        assert!(repo.remove(row.id).unwrap());

        assert!(!repo.mark_syncing(row.id).unwrap());
        assert_eq!(repo.mark_failed(row.id, "HTTP 500", Some(1)).unwrap(), None);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        db.connection()
            .execute(
                "INSERT INTO sync_queue (operation, data, timestamp, status)
                 VALUES ('ADD_TASK', '{not json', '2024-01-01T00:00:00.000Z', 'pending')",
                [],
            )
            .unwrap();
        assert!(repo.list().is_err());

        db.connection().execute("DELETE FROM sync_queue", []).unwrap();
        db.connection()
            .execute(
                "INSERT INTO sync_queue (operation, data, timestamp, status)
                 VALUES ('ADD_TASK', '{}', '2024-01-01T00:00:00.000Z', 'parked')",
                [],
            )
            .unwrap();
        assert!(repo.eligible().unwrap().is_empty());
        assert!(repo.list().is_err());
    }

    #[test]
    fn test_reset_in_flight() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let row = repo.append(&NewOperation::delete(Table::Tasks, "t")).unwrap();
        assert!(repo.mark_syncing(row.id).unwrap());

        assert_eq!(repo.reset_in_flight().unwrap(), 1);
        assert_eq!(repo.get(row.id).unwrap().unwrap().status, QueueStatus::Pending);
        assert_eq!(repo.max_id().unwrap(), row.id);
    }
}
