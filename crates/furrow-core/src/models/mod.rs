//! Data models for Furrow

mod field;
mod inventory;
mod livestock;
mod notification;
mod operations;
mod queue;
mod record;
mod sync_conflict;
mod table;
mod tile;

pub use field::{Field, FieldLog, FieldStatus, Sensor};
pub use inventory::{HarvestBatch, StockItem, Transaction, TransactionKind};
pub use livestock::{Animal, AnimalBatch, HealthRecord};
pub use notification::{Notification, Severity};
pub use operations::{FeedItem, Machine, Task, TaskStatus, UserProfile};
pub use queue::{
    extract_entity_id, operation_tag, Action, NewOperation, QueueOperation, QueueStatus,
};
pub use record::{
    diff_fields, from_record, into_record, merge, record_key, record_updated_at, stamp,
    to_record, Entity, Record, TIMESTAMP_FIELD,
};
pub use sync_conflict::{Conflict, ConflictChoice, ConflictResolution};
pub use table::{Resource, Table};
pub use tile::Tile;

/// New unique identifier (UUID v7, time-sortable)
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
