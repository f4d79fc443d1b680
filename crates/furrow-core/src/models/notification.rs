//! Notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_id, Entity, Table};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

/// Entry in the notification center (local only, never pushed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub read: bool,
    /// Sensor the notification is about, for hardware alerts
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notification {
    #[must_use]
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            message: message.into(),
            severity,
            read: false,
            sensor_id: None,
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn for_sensor(mut self, sensor_id: impl Into<String>) -> Self {
        self.sensor_id = Some(sensor_id.into());
        self
    }

    /// Unread critical alert about the given sensor
    #[must_use]
    pub fn is_open_critical_for(&self, sensor_id: &str) -> bool {
        !self.read
            && self.severity == Severity::Critical
            && self.sensor_id.as_deref() == Some(sensor_id)
    }
}

impl Entity for Notification {
    const TABLE: Table = Table::Notifications;

    fn key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_critical_guard() {
        let mut notification =
            Notification::new(Severity::Critical, "Sensor offline", "no data").for_sensor("s1");
        assert!(notification.is_open_critical_for("s1"));
        assert!(!notification.is_open_critical_for("s2"));

        notification.read = true;
        assert!(!notification.is_open_critical_for("s1"));
    }
}
