use std::io;

use furrow_core::sync::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] furrow_core::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record JSON provided")]
    EmptyRecord,
    #[error("Record must be a JSON object")]
    NotAnObject,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("No {table} record found for id/prefix: {query}")]
    RecordNotFound { table: String, query: String },
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Background job failed: {0}")]
    Worker(String),
    #[error(
        "Sync is not configured. Run `furrow config set --remote-url <URL> --api-key <KEY>`, or set FURROW_REMOTE_URL and FURROW_API_KEY."
    )]
    SyncNotConfigured,
}
