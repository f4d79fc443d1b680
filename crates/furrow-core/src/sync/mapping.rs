//! Translation between queued operations and the remote schema.
//!
//! Local records use camelCase keys, the remote tables use snake_case
//! columns. Keys that the generic converter gets wrong are listed per
//! resource in [`KEY_OVERRIDES`].

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::models::{Action, Resource};

/// Operation tag fragments and the resource they push to, most specific
/// first.
const RESOURCE_PATTERNS: &[(&str, Resource)] = &[
    ("ANIMAL_BATCH", Resource::AnimalBatches),
    ("ANIMAL", Resource::Animals),
    ("FIELD", Resource::Fields),
    ("MACHINE", Resource::Machines),
    ("STOCK", Resource::Stocks),
    ("TRANSACTION", Resource::Transactions),
    ("CREDIT", Resource::Transactions),
    ("TASK", Resource::Tasks),
    ("USER", Resource::Users),
    ("FEED", Resource::Feed),
];

/// Top-level keys with a fixed remote column name.
const KEY_OVERRIDES: &[(Resource, &str, &str)] = &[
    (Resource::Machines, "isoBus", "isobus"),
    (Resource::Users, "farmName", "farm_name"),
    (Resource::Fields, "areaHa", "area_ha"),
];

/// Remote resource an operation tag pushes to; `None` means local only.
pub fn resolve_resource(operation: &str) -> Option<Resource> {
    RESOURCE_PATTERNS
        .iter()
        .find(|(pattern, _)| operation.contains(pattern))
        .map(|(_, resource)| *resource)
}

/// Flatten an update payload `{id, updates}` into `{id, ...updates}`.
///
/// Payloads without an `updates` object are returned unchanged.
pub fn flatten_update(data: &Value) -> Value {
    let Some(object) = data.as_object() else {
        return data.clone();
    };
    let Some(updates) = object.get("updates").and_then(Value::as_object) else {
        return data.clone();
    };

    let mut flat = Map::new();
    if let Some(id) = object.get("id") {
        flat.insert("id".to_string(), id.clone());
    }
    for (key, value) in updates {
        flat.insert(key.clone(), value.clone());
    }
    Value::Object(flat)
}

/// Payload to push for a queued operation.
pub fn outbound_payload(operation: &str, resource: Resource, data: &Value) -> Value {
    let data = if Action::from_tag(operation) == Some(Action::Update) {
        flatten_update(data)
    } else {
        data.clone()
    };
    to_remote_keys(resource, &data)
}

/// Convert every key of `value` to the remote column names of `resource`.
pub fn to_remote_keys(resource: Resource, value: &Value) -> Value {
    convert_keys(value, &|key, top_level| {
        top_level
            .then(|| override_for(resource, key))
            .flatten()
            .map_or_else(|| camel_to_snake(key), str::to_string)
    })
}

/// Convert remote column names of `resource` back to local keys.
pub fn from_remote_keys(resource: Resource, value: &Value) -> Value {
    convert_keys(value, &|key, top_level| {
        top_level
            .then(|| reverse_override_for(resource, key))
            .flatten()
            .map_or_else(|| snake_to_camel(key), str::to_string)
    })
}

pub fn camel_to_snake(key: &str) -> String {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| {
        Regex::new(r"([a-z0-9])([A-Z])").expect("camel case boundary pattern is valid")
    });
    boundary.replace_all(key, "${1}_${2}").to_ascii_lowercase()
}

pub fn snake_to_camel(key: &str) -> String {
    let mut converted = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' && !converted.is_empty() {
            upper_next = true;
        } else if upper_next {
            converted.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            converted.push(ch);
        }
    }
    converted
}

fn override_for(resource: Resource, key: &str) -> Option<&'static str> {
    KEY_OVERRIDES
        .iter()
        .find(|(candidate, local, _)| *candidate == resource && *local == key)
        .map(|(_, _, remote)| *remote)
}

fn reverse_override_for(resource: Resource, column: &str) -> Option<&'static str> {
    KEY_OVERRIDES
        .iter()
        .find(|(candidate, _, remote)| *candidate == resource && *remote == column)
        .map(|(_, local, _)| *local)
}

fn convert_keys(value: &Value, rename: &dyn Fn(&str, bool) -> String) -> Value {
    fn walk(value: &Value, rename: &dyn Fn(&str, bool) -> String, top_level: bool) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, nested)| (rename(key, top_level), walk(nested, rename, false)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| walk(item, rename, false)).collect())
            }
            other => other.clone(),
        }
    }
    walk(value, rename, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn batch_tags_resolve_before_animal_tags() {
        assert_eq!(resolve_resource("UPDATE_ANIMAL_BATCH"), Some(Resource::AnimalBatches));
        assert_eq!(resolve_resource("ADD_ANIMAL"), Some(Resource::Animals));
        assert_eq!(resolve_resource("RECLAIM_CREDIT"), Some(Resource::Transactions));
        assert_eq!(resolve_resource("ADD_HARVEST"), None);
        assert_eq!(resolve_resource("ADD_NOTIFICATION"), None);
    }

    #[test]
    fn update_payload_is_flattened_and_snake_cased() {
        let data = json!({
            "id": "f1",
            "updates": {"id": "f1", "irrigationActive": true, "areaHa": 3.5,
                        "sensors": [{"lastSeen": "2024-01-01T00:00:00Z"}]}
        });
        let payload = outbound_payload("UPDATE_FIELD", Resource::Fields, &data);
        assert_eq!(
            payload,
            json!({
                "id": "f1",
                "irrigation_active": true,
                "area_ha": 3.5,
                "sensors": [{"last_seen": "2024-01-01T00:00:00Z"}]
            })
        );
    }

    #[test]
    fn add_payload_is_not_flattened() {
        let data = json!({"id": "t1", "updates": {"note": "literal key"}});
        let payload = outbound_payload("ADD_TASK", Resource::Tasks, &data);
        assert_eq!(payload["updates"]["note"], "literal key");
    }

    #[test]
    fn overrides_apply_per_resource() {
        let machine = to_remote_keys(Resource::Machines, &json!({"isoBus": true}));
        assert_eq!(machine, json!({"isobus": true}));

        let task = to_remote_keys(Resource::Tasks, &json!({"isoBus": true}));
        assert_eq!(task, json!({"iso_bus": true}));
    }

    #[test]
    fn remote_rows_map_back_to_local_keys() {
        let row = json!({"id": "m1", "isobus": false, "updated_at": "2024-01-01T00:00:00Z"});
        assert_eq!(
            from_remote_keys(Resource::Machines, &row),
            json!({"id": "m1", "isoBus": false, "updatedAt": "2024-01-01T00:00:00Z"})
        );
    }

    #[test]
    fn generic_converters() {
        assert_eq!(camel_to_snake("minThreshold"), "min_threshold");
        assert_eq!(camel_to_snake("ndviURL"), "ndvi_url");
        assert_eq!(camel_to_snake("id"), "id");
        assert_eq!(snake_to_camel("related_stock_id"), "relatedStockId");
        assert_eq!(snake_to_camel("_private"), "_private");
    }
}
