//! In-memory remote authority for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{watch, Notify};

use super::remote::{RemoteAuthority, RemoteError, RemoteResult};
use crate::models::Resource;
use crate::util::parse_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Upsert { resource: Resource, payload: Value },
    Delete { resource: Resource, id: String },
    Fetch { resource: Resource },
}

impl RemoteCall {
    pub const fn is_write(&self) -> bool {
        !matches!(self, Self::Fetch { .. })
    }
}

/// Records every call and keeps upserted rows keyed by resource and id.
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    rows: Mutex<BTreeMap<(String, String), Value>>,
    rejected_ids: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    gate: watch::Sender<bool>,
    entered: Notify,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            rows: Mutex::default(),
            rejected_ids: Mutex::default(),
            delay: Mutex::default(),
            gate: watch::channel(true).0,
            entered: Notify::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write targeting `id`.
    pub fn reject(&self, id: &str) {
        lock(&self.rejected_ids).insert(id.to_string());
    }

    pub fn accept(&self, id: &str) {
        lock(&self.rejected_ids).remove(id);
    }

    /// Delay every write by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Hold writes until [`Self::open_gate`] is called.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Resolves once a write has reached the remote.
    pub async fn write_entered(&self) {
        self.entered.notified().await;
    }

    /// Store a row as if another device had written it.
    pub fn seed(&self, resource: Resource, row: Value) {
        let id = row["id"].as_str().unwrap_or_default().to_string();
        lock(&self.rows).insert((resource.name().to_string(), id), row);
    }

    pub fn row(&self, resource: Resource, id: &str) -> Option<Value> {
        lock(&self.rows)
            .get(&(resource.name().to_string(), id.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.calls).iter().filter(|call| call.is_write()).count()
    }

    /// Ids written with upsert, in call order.
    pub fn upserted_ids(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Upsert { payload, .. } => payload["id"].as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    async fn before_write(&self, id: &str) -> RemoteResult<()> {
        self.entered.notify_one();
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.rejected_ids).contains(id) {
            return Err(RemoteError::Api(format!("row {id} rejected (500)")));
        }
        Ok(())
    }
}

impl RemoteAuthority for MockRemote {
    async fn upsert(&self, resource: Resource, payload: &Value) -> RemoteResult<()> {
        let id = payload["id"].as_str().unwrap_or_default().to_string();
        lock(&self.calls).push(RemoteCall::Upsert {
            resource,
            payload: payload.clone(),
        });
        self.before_write(&id).await?;

        let mut rows = lock(&self.rows);
        let key = (resource.name().to_string(), id);
        match (rows.get_mut(&key), payload.as_object()) {
            (Some(Value::Object(existing)), Some(update)) => {
                for (column, value) in update {
                    existing.insert(column.clone(), value.clone());
                }
            }
            _ => {
                rows.insert(key, payload.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: Resource, id: &str) -> RemoteResult<()> {
        lock(&self.calls).push(RemoteCall::Delete {
            resource,
            id: id.to_string(),
        });
        self.before_write(id).await?;
        lock(&self.rows).remove(&(resource.name().to_string(), id.to_string()));
        Ok(())
    }

    async fn fetch_since(
        &self,
        resource: Resource,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Value>> {
        lock(&self.calls).push(RemoteCall::Fetch { resource });
        let rows = lock(&self.rows);
        Ok(rows
            .iter()
            .filter(|((name, _), _)| name == resource.name())
            .map(|(_, row)| row)
            .filter(|row| {
                let updated = row["updated_at"].as_str().and_then(parse_timestamp);
                match (since, updated) {
                    (Some(since), Some(updated)) => updated > since,
                    _ => true,
                }
            })
            .cloned()
            .collect())
    }
}
