//! Field model with attached IoT sensors and an activity log

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_id, Entity, Table};

/// Cultivation status of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    #[default]
    Fallow,
    Planted,
    Growing,
    Harvested,
}

/// A field on the farm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Crop currently planted
    #[serde(default)]
    pub crop: Option<String>,
    /// Area in hectares
    #[serde(default)]
    pub area_ha: f64,
    #[serde(default)]
    pub status: FieldStatus,
    /// Whether irrigation is currently running
    #[serde(default)]
    pub irrigation_active: bool,
    /// Sensors installed on the field
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    /// Activity log, oldest first
    #[serde(default)]
    pub logs: Vec<FieldLog>,
    /// Last write timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Keys written by newer clients, kept untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Field {
    /// Create an empty fallow field
    #[must_use]
    pub fn new(name: impl Into<String>, area_ha: f64) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            crop: None,
            area_ha,
            status: FieldStatus::Fallow,
            irrigation_active: false,
            sensors: Vec::new(),
            logs: Vec::new(),
            updated_at: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Append an activity log entry
    pub fn log(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.logs.push(FieldLog {
            id: new_id(),
            at: Utc::now(),
            kind: kind.into(),
            message: message.into(),
        });
    }
}

impl Entity for Field {
    const TABLE: Table = Table::Fields;

    fn key(&self) -> &str {
        &self.id
    }
}

/// IoT sensor attached to a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: String,
    pub name: String,
    /// Sensor kind (e.g. "soil-moisture")
    #[serde(default)]
    pub kind: String,
    /// Last time the sensor reported
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub battery: Option<f64>,
}

impl Sensor {
    /// Whether the sensor has been silent for longer than `threshold`
    #[must_use]
    pub fn is_silent(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now - self.last_seen > threshold
    }
}

/// Entry in a field's activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLog {
    pub id: String,
    pub at: DateTime<Utc>,
    /// Activity kind (e.g. "irrigation", "harvest")
    pub kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_new() {
        let field = Field::new("North", 4.5);
        assert_eq!(field.status, FieldStatus::Fallow);
        assert!(!field.irrigation_active);
        assert!(field.sensors.is_empty());
    }

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let raw = json!({
            "id": "f1",
            "name": "North",
            "areaHa": 2.0,
            "soilType": "loam",
            "updatedAt": "2024-05-01T08:00:00.000Z"
        });
        let field: Field = serde_json::from_value(raw).unwrap();
        assert_eq!(field.extra.get("soilType"), Some(&json!("loam")));

        let back = serde_json::to_value(&field).unwrap();
        assert_eq!(back["soilType"], "loam");
        assert_eq!(back["areaHa"], 2.0);
    }

    #[test]
    fn test_sensor_silence() {
        let now = Utc::now();
        let sensor = Sensor {
            id: "s1".to_string(),
            name: "Probe".to_string(),
            kind: "soil-moisture".to_string(),
            last_seen: now - Duration::hours(30),
            battery: None,
        };
        assert!(sensor.is_silent(now, Duration::hours(24)));
        assert!(!sensor.is_silent(now, Duration::hours(48)));
    }

    #[test]
    fn test_log_appends() {
        let mut field = Field::new("South", 1.0);
        field.log("irrigation", "Irrigation started");
        assert_eq!(field.logs.len(), 1);
        assert_eq!(field.logs[0].kind, "irrigation");
    }
}
