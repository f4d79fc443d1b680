//! Remote authority client.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::models::Resource;
use crate::util::{format_timestamp, is_http_url, normalize_text_option};

const REST_PREFIX: &str = "rest/v1";
const HTTP_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Remote push timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Server that owns the canonical copy of every synced record.
///
/// Writes are idempotent upserts keyed by `id`; the remote settles
/// concurrent writers by last write wins.
pub trait RemoteAuthority: Send + Sync + 'static {
    /// Insert or merge a row.
    fn upsert(
        &self,
        resource: Resource,
        payload: &Value,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Remove a row by id. Deleting a missing row succeeds.
    fn delete(&self, resource: Resource, id: &str)
        -> impl Future<Output = RemoteResult<()>> + Send;

    /// Rows changed after `since` (every row when `None`), oldest first,
    /// with remote column names.
    fn fetch_since(
        &self,
        resource: Resource,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = RemoteResult<Vec<Value>>> + Send;
}

/// PostgREST-style HTTP remote.
#[derive(Clone)]
pub struct RestRemote {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRemote")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl RestRemote {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> RemoteResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            api_key: normalize_text_option(api_key),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()?,
        })
    }

    /// Client for the configured remote, `None` when no URL is set.
    pub fn from_config(config: &ClientConfig) -> RemoteResult<Option<Self>> {
        let Some(url) = normalize_text_option(config.remote_url.clone()) else {
            return Ok(None);
        };
        Self::new(url, config.api_key.clone()).map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, resource: Resource) -> String {
        format!("{}/{REST_PREFIX}/{}", self.base_url, resource.name())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api(parse_api_error(status, &body)))
    }
}

impl RemoteAuthority for RestRemote {
    async fn upsert(&self, resource: Resource, payload: &Value) -> RemoteResult<()> {
        let response = self
            .authorize(self.client.post(self.resource_url(resource)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, resource: Resource, id: &str) -> RemoteResult<()> {
        let url = format!(
            "{}?id=eq.{}",
            self.resource_url(resource),
            urlencoding::encode(id)
        );
        let response = self.authorize(self.client.delete(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_since(
        &self,
        resource: Resource,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Value>> {
        let mut url = format!("{}?select=*&order=updated_at.asc", self.resource_url(resource));
        if let Some(since) = since {
            url.push_str("&updated_at=gt.");
            url.push_str(&urlencoding::encode(&format_timestamp(since)));
        }

        let response = self
            .authorize(self.client.get(url))
            .header("Accept", "application/json")
            .send()
            .await?;
        let rows = Self::check(response).await?.json::<Value>().await?;
        match rows {
            Value::Array(rows) => Ok(rows),
            other => Err(RemoteError::InvalidPayload(format!(
                "expected an array of rows from {resource}, got {}",
                crate::util::compact_text(&other.to_string())
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details.and_then(|details| normalize_text_option(Some(details))) {
                Some(details) => format!("{} ({}): {details}", message.trim(), status.as_u16()),
                None => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("remote URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_validated_and_trimmed() {
        assert!(RestRemote::new("", None).is_err());
        assert!(RestRemote::new("farm.example.com", None).is_err());

        let remote = RestRemote::new("https://farm.example.com/", None).unwrap();
        assert_eq!(remote.base_url(), "https://farm.example.com");
        assert_eq!(
            remote.resource_url(Resource::AnimalBatches),
            "https://farm.example.com/rest/v1/animal_batches"
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let remote =
            RestRemote::new("https://farm.example.com", Some("anon-secret".to_string())).unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("anon-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn from_config_without_url_is_none() {
        assert!(RestRemote::from_config(&ClientConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn api_errors_prefer_structured_message() {
        let message = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key","details":"Key (id) exists"}"#,
        );
        assert_eq!(message, "duplicate key (409): Key (id) exists");

        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, "bad things"),
            "bad things (400)"
        );
    }
}
