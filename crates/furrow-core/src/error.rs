//! Error types for furrow-core

use thiserror::Error;

/// Result type alias using furrow-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in furrow-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("{table} record not found: {id}")]
    NotFound { table: String, id: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stock cannot cover the requested quantity
    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: String,
        requested: f64,
        available: f64,
    },
}

impl Error {
    pub(crate) fn not_found(table: impl ToString, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.to_string(),
            id: id.into(),
        }
    }
}
