//! Map tile cache repository

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::Tile;
use crate::util::{format_timestamp, parse_timestamp};

/// `SQLite` storage for cached map tiles
pub struct SqliteTileRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTileRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, url: &str) -> Result<Option<Tile>> {
        let raw: Option<(String, Vec<u8>, String)> = self
            .conn
            .query_row(
                "SELECT id, data, timestamp FROM tiles WHERE id = ?",
                params![url],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(raw.map(|(id, data, timestamp)| Tile {
            id,
            data,
            timestamp: parse_timestamp(&timestamp).unwrap_or_default(),
        }))
    }

    pub fn put(&self, tile: &Tile) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tiles (id, data, timestamp) VALUES (?, ?, ?)",
            params![tile.id, tile.data, format_timestamp(tile.timestamp)],
        )?;
        Ok(())
    }

    /// Remove tiles fetched before `cutoff`
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM tiles WHERE timestamp < ?",
            params![format_timestamp(cutoff)],
        )?)
    }

    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM tiles", [])?)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?)
    }
}
