//! Database migrations
//!
//! Migrations are additive only: records live in JSON documents, so new
//! entity fields never need a data migration.

use crate::error::Result;
use crate::models::Table;
use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &Connection, version: i32, statements: &[String]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in statements {
        tx.execute_batch(statement)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: entity tables, outbound queue and tile cache
fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            data TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status)".to_string(),
        "CREATE TABLE IF NOT EXISTS tiles (
            id TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            timestamp TEXT NOT NULL
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_tiles_timestamp ON tiles(timestamp)".to_string(),
    ];

    for table in Table::ALL {
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                {key} TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT
            )",
            name = table.name(),
            key = table.key_column(),
        ));
    }

    apply(conn, 1, &statements)
}

/// Migration to version 2: explicit entity reference and retry bookkeeping
/// on queue rows
fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "ALTER TABLE sync_queue ADD COLUMN entity_table TEXT",
        "ALTER TABLE sync_queue ADD COLUMN entity_id TEXT",
        "ALTER TABLE sync_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE sync_queue ADD COLUMN last_error TEXT",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_id)",
    ]
    .map(str::to_string);

    apply(conn, 2, &statements)
}

/// Migration to version 3: open conflicts and the resolution log
fn migrate_v3(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS conflicts (
            entity_id TEXT PRIMARY KEY,
            entity_table TEXT NOT NULL,
            local_data TEXT NOT NULL,
            remote_data TEXT NOT NULL,
            remote_version TEXT NOT NULL,
            detected_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_detected ON conflicts(detected_at)",
        "CREATE TABLE IF NOT EXISTS conflict_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            entity_table TEXT NOT NULL,
            remote_version TEXT NOT NULL,
            choice TEXT NOT NULL,
            resolved_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflict_log_entity
            ON conflict_log(entity_id, remote_version)",
    ]
    .map(str::to_string);

    apply(conn, 3, &statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_every_entity_table_exists() {
        let conn = setup();
        run(&conn).unwrap();

        for table in Table::ALL {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                    params![table.name()],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }

    #[test]
    fn test_v1_rows_survive_v2_upgrade() {
        let conn = setup();
        migrate_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO sync_queue (operation, data, timestamp, status)
             VALUES ('UPDATE_FIELD', '{\"id\":\"f1\"}', '2024-01-01T00:00:00.000Z', 'pending')",
            [],
        )
        .unwrap();

        run(&conn).unwrap();

        let (attempts, entity_id): (i64, Option<String>) = conn
            .query_row(
                "SELECT attempts, entity_id FROM sync_queue WHERE operation = 'UPDATE_FIELD'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(attempts, 0);
        assert_eq!(entity_id, None);
    }
}
