//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{diff_fields, Record, Table};
use crate::error::Error;

/// Divergence between a pending local change and a remote version of the
/// same entity, waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Entity id
    pub id: String,
    /// Table the entity lives in
    #[serde(rename = "type")]
    pub table: Table,
    /// Local record snapshot
    pub local_data: Record,
    /// Remote record snapshot
    pub remote_data: Record,
    /// Identifies the remote version that raised the conflict
    pub remote_version: String,
    /// Detection time
    pub timestamp: DateTime<Utc>,
}

impl Conflict {
    /// Field names whose values differ, for review screens
    pub fn changed_fields(&self) -> Vec<String> {
        diff_fields(self.table, &self.local_data, &self.remote_data)
    }
}

/// Which side of a conflict survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Remote,
}

impl ConflictChoice {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictChoice {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::InvalidInput(format!(
                "conflict choice must be 'local' or 'remote', got '{other}'"
            ))),
        }
    }
}

/// Logged resolution; a conflict for the same entity and remote version is
/// never raised again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub entity_id: String,
    pub table: Table,
    pub remote_version: String,
    pub choice: ConflictChoice,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}
