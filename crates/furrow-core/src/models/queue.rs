//! Outbound queue model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Record, Table};
use crate::error::Error;

/// Push progress of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for the next drain
    Pending,
    /// Being pushed by the current drain
    Syncing,
    /// Last push was rejected; retried by the next drain
    Failed,
    /// Retry budget exhausted; skipped until requeued
    Dead,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(Error::InvalidInput(format!("unknown queue status '{other}'"))),
        }
    }
}

/// Kind of change carried by a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Action encoded in an operation tag, if any
    pub fn from_tag(tag: &str) -> Option<Self> {
        [Self::Add, Self::Update, Self::Delete]
            .into_iter()
            .find(|action| {
                tag.strip_prefix(action.prefix())
                    .is_some_and(|rest| rest.starts_with('_'))
            })
    }
}

/// Tag naming a mutation, e.g. `UPDATE_FIELD`
pub fn operation_tag(action: Action, table: Table) -> String {
    format!("{}_{}", action.prefix(), table.operation_noun())
}

/// Operation ready to be appended to the queue
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation: String,
    pub data: Value,
    pub entity_table: Option<Table>,
    pub entity_id: Option<String>,
}

impl NewOperation {
    pub fn add(table: Table, id: impl Into<String>, record: &Record) -> Self {
        Self {
            operation: operation_tag(Action::Add, table),
            data: Value::Object(record.clone()),
            entity_table: Some(table),
            entity_id: Some(id.into()),
        }
    }

    /// Update carrying the full post-merge record under `updates`
    pub fn update(table: Table, id: impl Into<String>, record: &Record) -> Self {
        let id = id.into();
        Self {
            operation: operation_tag(Action::Update, table),
            data: json!({ "id": id, "updates": record }),
            entity_table: Some(table),
            entity_id: Some(id),
        }
    }

    pub fn delete(table: Table, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            operation: operation_tag(Action::Delete, table),
            data: json!({ "id": id }),
            entity_table: Some(table),
            entity_id: Some(id),
        }
    }

    /// Free-form operation; the entity id is recovered from the payload
    pub fn raw(operation: impl Into<String>, data: Value) -> Self {
        let entity_id = extract_entity_id(&data);
        Self {
            operation: operation.into(),
            data,
            entity_table: None,
            entity_id,
        }
    }
}

/// Persisted queue row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOperation {
    pub id: i64,
    pub operation: String,
    pub data: Value,
    /// RFC 3339 enqueue time
    pub timestamp: String,
    pub status: QueueStatus,
    pub entity_table: Option<Table>,
    pub entity_id: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueueOperation {
    /// Entity the operation targets, preferring the id recorded at enqueue time
    pub fn target_entity_id(&self) -> Option<String> {
        self.entity_id
            .clone()
            .or_else(|| extract_entity_id(&self.data))
    }

    pub fn action(&self) -> Option<Action> {
        Action::from_tag(&self.operation)
    }
}

/// Look for an entity id in the payload shapes older clients produced
pub fn extract_entity_id(data: &Value) -> Option<String> {
    let candidates = [
        data.get("id"),
        data.get("updates").and_then(|updates| updates.get("id")),
        data.get("fieldId"),
        data.get("batchId"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tags() {
        assert_eq!(operation_tag(Action::Update, Table::Fields), "UPDATE_FIELD");
        assert_eq!(
            operation_tag(Action::Add, Table::AnimalBatches),
            "ADD_ANIMAL_BATCH"
        );
    }

    #[test]
    fn test_action_from_tag() {
        assert_eq!(Action::from_tag("UPDATE_STOCK"), Some(Action::Update));
        assert_eq!(Action::from_tag("DELETE_TASK"), Some(Action::Delete));
        assert_eq!(Action::from_tag("ADDRESS_CHANGE"), None);
        assert_eq!(Action::from_tag("RECLAIM_CREDIT"), None);
    }

    #[test]
    fn test_extract_entity_id_shapes() {
        assert_eq!(extract_entity_id(&json!({"id": "a"})).as_deref(), Some("a"));
        assert_eq!(
            extract_entity_id(&json!({"updates": {"id": "b"}})).as_deref(),
            Some("b")
        );
        assert_eq!(
            extract_entity_id(&json!({"fieldId": "c", "on": true})).as_deref(),
            Some("c")
        );
        assert_eq!(
            extract_entity_id(&json!({"batchId": "d"})).as_deref(),
            Some("d")
        );
        assert_eq!(extract_entity_id(&json!({"amount": 3})), None);
    }

    #[test]
    fn test_update_payload_shape() {
        let mut record = Record::new();
        record.insert("id".to_string(), json!("f1"));
        record.insert("name".to_string(), json!("North"));
        let op = NewOperation::update(Table::Fields, "f1", &record);
        assert_eq!(op.data["id"], "f1");
        assert_eq!(op.data["updates"]["name"], "North");
        assert_eq!(op.entity_id.as_deref(), Some("f1"));
    }
}
