//! Entity record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{into_record, record_key, Record, Table, TIMESTAMP_FIELD};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// Trait for entity record storage operations
pub trait RecordRepository {
    /// Get a record by primary key
    fn get(&self, table: Table, key: &str) -> Result<Option<Record>>;

    /// Insert or replace a record, keyed by its primary key field
    fn put(&self, table: Table, record: &Record) -> Result<()>;

    /// Insert or replace many records in one statement cache pass
    fn bulk_put(&self, table: Table, records: &[Record]) -> Result<usize>;

    /// Delete a record, returning whether a row was removed
    fn delete(&self, table: Table, key: &str) -> Result<bool>;

    /// Scan a table in key order
    fn list(&self, table: Table, limit: usize, offset: usize) -> Result<Vec<Record>>;

    /// Number of records in a table
    fn count(&self, table: Table) -> Result<usize>;

    /// Delete up to `limit` records whose key starts with `prefix`
    fn delete_by_key_prefix(&self, table: Table, prefix: &str, limit: usize) -> Result<usize>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from its stored JSON document
    fn parse_record(raw: &str) -> Result<Record> {
        into_record(serde_json::from_str(raw)?)
    }

    fn require_key(table: Table, record: &Record) -> Result<String> {
        record_key(table, record)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{table} record is missing its '{}' key",
                    table.key_field()
                ))
            })
    }

    fn updated_at(record: &Record) -> Option<&str> {
        record.get(TIMESTAMP_FIELD).and_then(Value::as_str)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get(&self, table: Table, key: &str) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT data FROM {} WHERE {} = ?",
            table.name(),
            table.key_column()
        );
        let raw: Option<String> = self
            .conn
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?;

        raw.as_deref().map(Self::parse_record).transpose()
    }

    fn put(&self, table: Table, record: &Record) -> Result<()> {
        let key = Self::require_key(table, record)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}, data, updated_at) VALUES (?, ?, ?)",
            table.name(),
            table.key_column()
        );
        self.conn.execute(
            &sql,
            params![
                key,
                serde_json::to_string(record)?,
                Self::updated_at(record)
            ],
        )?;
        Ok(())
    }

    fn bulk_put(&self, table: Table, records: &[Record]) -> Result<usize> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}, data, updated_at) VALUES (?, ?, ?)",
            table.name(),
            table.key_column()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        for record in records {
            let key = Self::require_key(table, record)?;
            stmt.execute(params![
                key,
                serde_json::to_string(record)?,
                Self::updated_at(record)
            ])?;
        }
        Ok(records.len())
    }

    fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            table.name(),
            table.key_column()
        );
        let rows = self.conn.execute(&sql, params![key])?;
        Ok(rows > 0)
    }

    fn list(&self, table: Table, limit: usize, offset: usize) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT data FROM {} ORDER BY {} LIMIT ? OFFSET ?",
            table.name(),
            table.key_column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.iter().map(|data| Self::parse_record(data)).collect()
    }

    fn count(&self, table: Table) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn delete_by_key_prefix(&self, table: Table, prefix: &str, limit: usize) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {name} WHERE {key} IN (
                SELECT {key} FROM {name} WHERE substr({key}, 1, length(?1)) = ?1 LIMIT ?2
            )",
            name = table.name(),
            key = table.key_column()
        );
        Ok(self.conn.execute(&sql, params![prefix, limit as i64])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let field =
            record(json!({"id": "f1", "name": "North", "updatedAt": "2024-01-01T00:00:00.000Z"}));
        repo.put(Table::Fields, &field).unwrap();

        let fetched = repo.get(Table::Fields, "f1").unwrap().unwrap();
        assert_eq!(fetched, field);
        assert!(repo.get(Table::Animals, "f1").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        repo.put(Table::Tasks, &record(json!({"id": "t1", "title": "Old"})))
            .unwrap();
        repo.put(Table::Tasks, &record(json!({"id": "t1", "title": "New"})))
            .unwrap();

        assert_eq!(repo.count(Table::Tasks).unwrap(), 1);
        let fetched = repo.get(Table::Tasks, "t1").unwrap().unwrap();
        assert_eq!(fetched["title"], "New");
    }

    #[test]
    fn test_put_requires_key() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let error = repo
            .put(Table::Fields, &record(json!({"name": "Nameless"})))
            .unwrap_err();
        assert!(error.to_string().contains("'id'"));
    }

    #[test]
    fn test_harvests_keyed_by_batch_id() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        repo.put(Table::Harvests, &record(json!({"batchId": "b1", "crop": "wheat"})))
            .unwrap();
        let fetched = repo.get(Table::Harvests, "b1").unwrap().unwrap();
        assert_eq!(fetched["crop"], "wheat");
    }

    #[test]
    fn test_bulk_put_list_and_delete() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let records = (0..5)
            .map(|i| record(json!({"id": format!("a{i}"), "tag": i})))
            .collect::<Vec<_>>();
        assert_eq!(repo.bulk_put(Table::Animals, &records).unwrap(), 5);

        let listed = repo.list(Table::Animals, 2, 1).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["id"], "a1");

        assert!(repo.delete(Table::Animals, "a0").unwrap());
        assert!(!repo.delete(Table::Animals, "a0").unwrap());
        assert_eq!(repo.count(Table::Animals).unwrap(), 4);
    }

    #[test]
    fn test_delete_by_key_prefix_respects_limit() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let mut records = (0..4)
            .map(|i| record(json!({"id": format!("stress-{i}")})))
            .collect::<Vec<_>>();
        records.push(record(json!({"id": "cow-1"})));
        repo.bulk_put(Table::Animals, &records).unwrap();

        assert_eq!(repo.delete_by_key_prefix(Table::Animals, "stress-", 3).unwrap(), 3);
        assert_eq!(repo.delete_by_key_prefix(Table::Animals, "stress-", 3).unwrap(), 1);
        assert_eq!(repo.count(Table::Animals).unwrap(), 1);
    }
}
