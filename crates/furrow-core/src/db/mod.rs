//! Database layer for Furrow

mod connection;
mod conflict_repository;
mod migrations;
mod queue_repository;
mod repository;
mod tile_repository;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use repository::{RecordRepository, SqliteRecordRepository};
pub use tile_repository::SqliteTileRepository;
