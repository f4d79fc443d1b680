use chrono::{DateTime, Utc};
use furrow_core::config::ClientConfig;
use furrow_core::models::Resource;
use furrow_core::sync::{RemoteAuthority, RemoteError, RemoteResult, RestRemote};
use serde_json::Value;

/// Remote used by the binary. Without a configured URL every call fails,
/// so local commands still work and rows stay queued.
#[derive(Debug, Clone)]
pub enum CliRemote {
    Rest(RestRemote),
    Unconfigured,
}

impl CliRemote {
    pub fn from_config(config: &ClientConfig) -> RemoteResult<Self> {
        Ok(RestRemote::from_config(config)?.map_or(Self::Unconfigured, Self::Rest))
    }

    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Rest(_))
    }
}

fn unconfigured() -> RemoteError {
    RemoteError::InvalidConfiguration("no remote URL configured".to_string())
}

impl RemoteAuthority for CliRemote {
    async fn upsert(&self, resource: Resource, payload: &Value) -> RemoteResult<()> {
        match self {
            Self::Rest(remote) => remote.upsert(resource, payload).await,
            Self::Unconfigured => Err(unconfigured()),
        }
    }

    async fn delete(&self, resource: Resource, id: &str) -> RemoteResult<()> {
        match self {
            Self::Rest(remote) => remote.delete(resource, id).await,
            Self::Unconfigured => Err(unconfigured()),
        }
    }

    async fn fetch_since(
        &self,
        resource: Resource,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Value>> {
        match self {
            Self::Rest(remote) => remote.fetch_since(resource, since).await,
            Self::Unconfigured => Err(unconfigured()),
        }
    }
}
