//! Untyped JSON records as stored in the local tables.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::Table;
use crate::error::{Error, Result};
use crate::util::{format_timestamp, parse_timestamp};

/// A stored record: a JSON object with camelCase keys.
pub type Record = Map<String, Value>;

/// Last-write timestamp key present on every record.
pub const TIMESTAMP_FIELD: &str = "updatedAt";

/// A typed domain entity stored in one table.
pub trait Entity: Serialize + DeserializeOwned {
    const TABLE: Table;

    /// Primary key value.
    fn key(&self) -> &str;
}

/// Primary key of a record in the given table.
pub fn record_key(table: Table, record: &Record) -> Option<&str> {
    record
        .get(table.key_field())
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
}

/// Parsed last-write timestamp of a record.
pub fn record_updated_at(record: &Record) -> Option<DateTime<Utc>> {
    record
        .get(TIMESTAMP_FIELD)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

/// Set the last-write timestamp.
pub fn stamp(record: &mut Record, at: DateTime<Utc>) {
    record.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::String(format_timestamp(at)),
    );
}

/// Shallow merge of `updates` into `base`; keys in `updates` win.
pub fn merge(base: &mut Record, updates: &Record) {
    for (key, value) in updates {
        base.insert(key.clone(), value.clone());
    }
}

/// Coerce arbitrary JSON into a record.
pub fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidInput(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

pub fn to_record<T: Entity>(entity: &T) -> Result<Record> {
    into_record(serde_json::to_value(entity)?)
}

pub fn from_record<T: Entity>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Names of fields whose serialized values differ between two versions of a
/// record, ignoring the key and timestamp fields. Sorted for stable output.
pub fn diff_fields(table: Table, local: &Record, remote: &Record) -> Vec<String> {
    let mut names = local
        .keys()
        .chain(remote.keys())
        .filter(|key| key.as_str() != table.key_field() && key.as_str() != TIMESTAMP_FIELD)
        .filter(|key| {
            let left = local.get(key.as_str()).map(Value::to_string);
            let right = remote.get(key.as_str()).map(Value::to_string);
            left != right
        })
        .cloned()
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    #[test]
    fn diff_ignores_identity_and_timestamp() {
        let local = record(json!({"id": "x", "name": "A", "area": 3, "updatedAt": "1"}));
        let remote =
            record(json!({"id": "x", "name": "B", "area": 3, "updatedAt": "2", "crop": "oat"}));
        assert_eq!(diff_fields(Table::Fields, &local, &remote), vec!["crop", "name"]);
    }

    #[test]
    fn diff_uses_batch_id_for_harvests() {
        let local = record(json!({"batchId": "h1", "quantity": 1}));
        let remote = record(json!({"batchId": "h2", "quantity": 1}));
        assert!(diff_fields(Table::Harvests, &local, &remote).is_empty());
    }

    #[test]
    fn record_key_rejects_empty_ids() {
        assert_eq!(record_key(Table::Fields, &record(json!({"id": ""}))), None);
        assert_eq!(record_key(Table::Fields, &record(json!({"id": "f1"}))), Some("f1"));
    }

    #[test]
    fn into_record_rejects_non_objects() {
        assert!(into_record(json!([1, 2])).is_err());
    }
}
