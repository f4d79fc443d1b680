//! Conflict detection for incoming remote records and explicit resolution.

use chrono::Utc;

use crate::db::{
    ConflictRepository, QueueRepository, RecordRepository, SqliteConflictRepository,
    SqliteQueueRepository, SqliteRecordRepository,
};
use crate::models::{
    diff_fields, record_key, record_updated_at, stamp, Conflict, ConflictChoice,
    ConflictResolution, Record, Table, TIMESTAMP_FIELD,
};
use crate::services::{DatabaseService, StoreEvent};
use crate::{Error, Result};

/// What happened to a remote record handed to [`detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    /// No local change was pending; the remote record was stored
    Applied,
    /// Local copy is as new or newer, or identical
    Unchanged,
    /// A local change is pending and the record differs. `new` is false
    /// when a conflict was already open for the entity.
    Conflict { new: bool },
    /// This remote version was already resolved by the user
    AlreadyResolved,
}

/// Identifier of the remote version of a record.
///
/// Uses `updatedAt` when present, otherwise the canonical JSON text.
pub fn remote_version(record: &Record) -> String {
    record
        .get(TIMESTAMP_FIELD)
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || serde_json::Value::Object(record.clone()).to_string(),
            str::to_string,
        )
}

/// Compare an incoming remote record against local state.
pub async fn detect(store: &DatabaseService, table: Table, remote: Record) -> Result<RemoteChange> {
    let key = record_key(table, &remote)
        .ok_or_else(|| {
            Error::InvalidInput(format!("remote {table} record has no '{}'", table.key_field()))
        })?
        .to_string();

    let outcome = store
        .transaction(|conn| {
            let records = SqliteRecordRepository::new(conn);
            let conflicts = SqliteConflictRepository::new(conn);
            let local = records.get(table, &key)?;
            let pending = !SqliteQueueRepository::new(conn)
                .unresolved_for_entity(table, &key)?
                .is_empty();

            if !pending {
                let newer = match &local {
                    None => true,
                    Some(local) => match (record_updated_at(&remote), record_updated_at(local)) {
                        (Some(remote_at), Some(local_at)) => remote_at > local_at,
                        (Some(_), None) => true,
                        _ => false,
                    },
                };
                if newer && local.as_ref() != Some(&remote) {
                    records.put(table, &remote)?;
                    return Ok(RemoteChange::Applied);
                }
                return Ok(RemoteChange::Unchanged);
            }

            // A pending delete wins; the push removes the remote row.
            let Some(local) = local else {
                return Ok(RemoteChange::Unchanged);
            };
            if diff_fields(table, &local, &remote).is_empty() {
                return Ok(RemoteChange::Unchanged);
            }

            let version = remote_version(&remote);
            if conflicts.was_resolved(&key, &version)? {
                return Ok(RemoteChange::AlreadyResolved);
            }

            let new = conflicts.insert_if_absent(&Conflict {
                id: key.clone(),
                table,
                local_data: local,
                remote_data: remote.clone(),
                remote_version: version,
                timestamp: Utc::now(),
            })?;
            Ok(RemoteChange::Conflict { new })
        })
        .await?;

    match &outcome {
        RemoteChange::Applied => store.publish(StoreEvent::Upserted {
            table,
            record: remote,
        }),
        RemoteChange::Conflict { new: true } => {
            tracing::info!("Conflict raised for {table} {key}");
            store.publish(StoreEvent::ConflictsChanged);
        }
        _ => {}
    }
    Ok(outcome)
}

/// Settle the open conflict for `entity_id`.
///
/// Keeping the remote version overwrites the local row and drops every
/// queued change for the entity. Keeping the local version rewrites the
/// local row with a fresh timestamp and leaves the queue alone.
pub async fn resolve(
    store: &DatabaseService,
    entity_id: &str,
    choice: ConflictChoice,
) -> Result<ConflictResolution> {
    let (resolution, record, dropped) = store
        .transaction(|conn| {
            let conflicts = SqliteConflictRepository::new(conn);
            let conflict = conflicts
                .get(entity_id)?
                .ok_or_else(|| Error::not_found("conflict", entity_id))?;

            let (record, dropped) = match choice {
                ConflictChoice::Remote => {
                    let dropped = SqliteQueueRepository::new(conn)
                        .remove_for_entity(conflict.table, entity_id)?;
                    (conflict.remote_data.clone(), dropped)
                }
                ConflictChoice::Local => {
                    let mut record = conflict.local_data.clone();
                    stamp(&mut record, Utc::now());
                    (record, 0)
                }
            };
            SqliteRecordRepository::new(conn).put(conflict.table, &record)?;
            conflicts.remove(entity_id)?;

            let resolution = ConflictResolution {
                entity_id: entity_id.to_string(),
                table: conflict.table,
                remote_version: conflict.remote_version,
                choice,
                resolved_at: Utc::now().timestamp_millis(),
            };
            conflicts.log_resolution(&resolution)?;
            Ok((resolution, record, dropped))
        })
        .await?;

    tracing::info!(
        "Resolved conflict for {} {entity_id}: kept {choice}, dropped {dropped} queued change(s)",
        resolution.table
    );
    store.publish(StoreEvent::Upserted {
        table: resolution.table,
        record,
    });
    if dropped > 0 {
        store.publish(StoreEvent::QueueChanged);
    }
    store.publish(StoreEvent::ConflictsChanged);
    Ok(resolution)
}
