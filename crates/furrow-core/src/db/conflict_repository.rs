//! Open conflicts and the resolution log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::Result;
use crate::models::{into_record, Conflict, ConflictChoice, ConflictResolution, Table};
use crate::util::{format_timestamp, parse_timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Raw `conflicts` row: id, table, local JSON, remote JSON, version, detected at
type ConflictRow = (String, String, String, String, String, String);

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Store a conflict unless one is already open for the entity.
    /// Returns whether the conflict was stored.
    fn insert_if_absent(&self, conflict: &Conflict) -> Result<bool>;

    fn get(&self, entity_id: &str) -> Result<Option<Conflict>>;

    /// Open conflicts, oldest first
    fn list(&self) -> Result<Vec<Conflict>>;

    fn remove(&self, entity_id: &str) -> Result<bool>;

    fn count(&self) -> Result<usize>;

    fn log_resolution(&self, resolution: &ConflictResolution) -> Result<()>;

    /// Whether this remote version of the entity was already resolved
    fn was_resolved(&self, entity_id: &str, remote_version: &str) -> Result<bool>;

    /// Most recent resolutions first
    fn list_resolutions(&self, limit: usize) -> Result<Vec<ConflictResolution>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row<'_>) -> rusqlite::Result<ConflictRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn build_conflict(
        (id, table, local, remote, remote_version, detected_at): ConflictRow,
    ) -> Result<Conflict> {
        Ok(Conflict {
            id,
            table: table.parse::<Table>()?,
            local_data: into_record(serde_json::from_str(&local)?)?,
            remote_data: into_record(serde_json::from_str(&remote)?)?,
            remote_version,
            timestamp: parse_timestamp(&detected_at).unwrap_or_default(),
        })
    }

    fn parse_resolution(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn insert_if_absent(&self, conflict: &Conflict) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO conflicts
                (entity_id, entity_table, local_data, remote_data, remote_version, detected_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                conflict.id,
                conflict.table.name(),
                serde_json::to_string(&conflict.local_data)?,
                serde_json::to_string(&conflict.remote_data)?,
                conflict.remote_version,
                format_timestamp(conflict.timestamp),
            ],
        )?;
        Ok(rows > 0)
    }

    fn get(&self, entity_id: &str) -> Result<Option<Conflict>> {
        let raw = self
            .conn
            .query_row(
                "SELECT entity_id, entity_table, local_data, remote_data,
                        remote_version, detected_at
                 FROM conflicts WHERE entity_id = ?",
                params![entity_id],
                Self::parse_conflict,
            )
            .optional()?;
        raw.map(Self::build_conflict).transpose()
    }

    fn list(&self) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, entity_table, local_data, remote_data, remote_version, detected_at
             FROM conflicts ORDER BY detected_at, rowid",
        )?;
        let raw = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(Self::build_conflict).collect()
    }

    fn remove(&self, entity_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM conflicts WHERE entity_id = ?", params![entity_id])?;
        Ok(rows > 0)
    }

    fn count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM conflicts", [], |row| row.get(0))?)
    }

    fn log_resolution(&self, resolution: &ConflictResolution) -> Result<()> {
        self.conn.execute(
            "INSERT INTO conflict_log (entity_id, entity_table, remote_version, choice, resolved_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                resolution.entity_id,
                resolution.table.name(),
                resolution.remote_version,
                resolution.choice.as_str(),
                resolution.resolved_at,
            ],
        )?;
        Ok(())
    }

    fn was_resolved(&self, entity_id: &str, remote_version: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conflict_log WHERE entity_id = ? AND remote_version = ?)",
            params![entity_id, remote_version],
            |row| row.get(0),
        )?)
    }

    fn list_resolutions(&self, limit: usize) -> Result<Vec<ConflictResolution>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, entity_table, remote_version, choice, resolved_at
             FROM conflict_log ORDER BY resolved_at DESC, id DESC LIMIT ?",
        )?;
        let raw = stmt
            .query_map(params![limit as i64], Self::parse_resolution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(entity_id, table, remote_version, choice, resolved_at)| {
                Ok(ConflictResolution {
                    entity_id,
                    table: table.parse()?,
                    remote_version,
                    choice: choice.parse::<ConflictChoice>()?,
                    resolved_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict(id: &str, version: &str) -> Conflict {
        Conflict {
            id: id.to_string(),
            table: Table::Fields,
            local_data: into_record(json!({"id": id, "name": "A"})).unwrap(),
            remote_data: into_record(json!({"id": id, "name": "B"})).unwrap(),
            remote_version: version.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_one_open_conflict_per_entity() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());

        assert!(repo.insert_if_absent(&conflict("x", "v1")).unwrap());
        assert!(!repo.insert_if_absent(&conflict("x", "v2")).unwrap());
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.get("x").unwrap().unwrap().remote_version, "v1");
    }

    #[test]
    fn test_list_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut older = conflict("b", "v1");
        older.timestamp = Utc::now() - chrono::Duration::minutes(5);
        repo.insert_if_absent(&conflict("a", "v1")).unwrap();
        repo.insert_if_absent(&older).unwrap();

        let ids = repo
            .list()
            .unwrap()
            .into_iter()
            .map(|conflict| conflict.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_resolution_log() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());

        repo.log_resolution(&ConflictResolution {
            entity_id: "x".to_string(),
            table: Table::Fields,
            remote_version: "v1".to_string(),
            choice: ConflictChoice::Remote,
            resolved_at: 42,
        })
        .unwrap();

        assert!(repo.was_resolved("x", "v1").unwrap());
        assert!(!repo.was_resolved("x", "v2").unwrap());
        let log = repo.list_resolutions(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].choice, ConflictChoice::Remote);
    }
}
