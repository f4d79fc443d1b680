//! Map tile cache entry

use chrono::{DateTime, Utc};

/// Cached map tile keyed by its URL. Never synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// Tile URL
    pub id: String,
    pub data: Vec<u8>,
    /// Time the tile was fetched
    pub timestamp: DateTime<Utc>,
}
