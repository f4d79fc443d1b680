use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use furrow_core::config::{ClientConfig, SyncConfig};
use furrow_core::models::{
    record_key, record_updated_at, Conflict, ConflictResolution, QueueOperation, Record, Table,
};
use furrow_core::{DatabaseService, FarmService, SyncManager, SyncSnapshot};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;
use crate::remote::CliRemote;

const DB_PATH_ENV: &str = "FURROW_DB_PATH";
const PREVIEW_KEYS: [&str; 6] = ["name", "title", "tag", "content", "category", "crop"];

/// Resolved invocation settings shared by every command.
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    /// Config as stored on disk
    pub file_config: ClientConfig,
    /// Config after environment overrides
    pub config: ClientConfig,
    pub json: bool,
}

impl Context {
    pub async fn open_store(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path(self.db_path.clone()).await?)
    }

    /// Mutation service with sync held offline; rows stay queued until
    /// `furrow sync` or `furrow watch` pushes them.
    pub async fn open_farm(&self) -> Result<FarmService<CliRemote>, CliError> {
        let store = self.open_store().await?;
        let remote = CliRemote::from_config(&self.config)?;
        let manager = SyncManager::new(store, remote, self.config.sync_config());
        manager.set_online(false);
        Ok(FarmService::new(manager))
    }

    /// Sync manager bound to the configured remote.
    pub async fn open_sync(&self) -> Result<SyncManager<CliRemote>, CliError> {
        self.open_sync_with(self.config.sync_config()).await
    }

    pub async fn open_sync_with(
        &self,
        sync_config: SyncConfig,
    ) -> Result<SyncManager<CliRemote>, CliError> {
        self.config
            .remote_url()
            .map_err(|error| CliError::Config(error.to_string()))?;
        let remote = CliRemote::from_config(&self.config)?;
        if !remote.is_configured() {
            return Err(CliError::SyncNotConfigured);
        }
        let store = self.open_store().await?;
        Ok(SyncManager::new(store, remote, sync_config))
    }
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_config_path {
        return Ok(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("furrow").join("config.json"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    config: &ClientConfig,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .or_else(|| config.db_path.as_ref().map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("furrow").join("furrow.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn parse_table(name: &str) -> Result<Table, CliError> {
    Ok(name.parse::<Table>()?)
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn parse_record(raw: &str) -> Result<Record, CliError> {
    match serde_json::from_str::<Value>(raw.trim())? {
        Value::Object(map) => Ok(map),
        _ => Err(CliError::NotAnObject),
    }
}

/// Record JSON from the argument, piped stdin or an editor session, in that
/// order.
pub fn resolve_record_input(json: Option<&str>, initial: &str) -> Result<Record, CliError> {
    if let Some(raw) = json.and_then(normalize_content) {
        return parse_record(&raw);
    }

    if let Some(raw) = read_piped_stdin()? {
        return parse_record(&raw);
    }

    if let Some(raw) = capture_editor_input_with_initial(initial)? {
        return parse_record(&raw);
    }

    Err(CliError::EmptyRecord)
}

/// Find a record by exact key, falling back to a unique key prefix.
pub async fn resolve_record(
    store: &DatabaseService,
    table: Table,
    query: &str,
) -> Result<Record, CliError> {
    if let Some(record) = store.get_record(table, query).await? {
        return Ok(record);
    }

    let mut matching = store
        .list_records(table)
        .await?
        .into_iter()
        .filter(|record| record_key(table, record).is_some_and(|key| key.starts_with(query)))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::RecordNotFound {
            table: table.to_string(),
            query: query.to_string(),
        }),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .filter_map(|record| record_key(table, record))
                .map(short_id)
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let text = PREVIEW_KEYS
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .unwrap_or("");
    truncate(&text.split_whitespace().collect::<Vec<_>>().join(" "), max_chars)
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = text.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_record_lines(table: Table, records: &[Record], now: DateTime<Utc>) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = short_id(record_key(table, record).unwrap_or("?"));
            let preview = record_preview(record, 40);
            let relative_time = record_updated_at(record)
                .map_or_else(|| "-".to_string(), |at| format_relative_time(at, now));
            format!("{id:<13}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn format_queue_lines(operations: &[QueueOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let target = operation
                .target_entity_id()
                .map_or_else(|| "-".to_string(), |id| short_id(&id));
            let mut line = format!(
                "#{:<6} {:<8} {:<22} {target:<13}  attempts={}",
                operation.id,
                operation.status.as_str(),
                operation.operation,
                operation.attempts
            );
            if let Some(error) = operation.last_error.as_deref() {
                line.push_str("  error=");
                line.push_str(&truncate(error, 60));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<14} {:<13}  fields={}",
                format_sync_timestamp(conflict.timestamp),
                conflict.table.name(),
                short_id(&conflict.id),
                conflict.changed_fields().join(",")
            )
        })
        .collect()
}

pub fn format_resolution_lines(resolutions: &[ConflictResolution]) -> Vec<String> {
    resolutions
        .iter()
        .map(|resolution| {
            let resolved_at = DateTime::from_timestamp_millis(resolution.resolved_at).map_or_else(
                || resolution.resolved_at.to_string(),
                format_sync_timestamp,
            );
            format!(
                "{resolved_at}  {:<6} {:<14} {}",
                resolution.choice.as_str(),
                resolution.table.name(),
                short_id(&resolution.entity_id)
            )
        })
        .collect()
}

pub fn format_snapshot(snapshot: &SyncSnapshot) -> String {
    let last_sync = snapshot
        .last_sync_time
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    format!(
        "status={} pending={} conflicts={} last_sync={last_sync}",
        snapshot.status, snapshot.pending_operations, snapshot.open_conflicts
    )
}

pub fn format_sync_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_record_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_record_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("furrow-record-{}-{now}.json", std::process::id()))
}
