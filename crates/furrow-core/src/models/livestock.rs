//! Animal and animal batch models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_id, Entity, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animal {
    pub id: String,
    /// Ear tag or other visible identifier
    pub tag: String,
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub health_records: Vec<HealthRecord>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Animal {
    #[must_use]
    pub fn new(tag: impl Into<String>, species: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            tag: tag.into(),
            species: species.into(),
            breed: None,
            location: None,
            batch_id: None,
            weight_kg: None,
            health_records: Vec::new(),
            updated_at: Utc::now(),
            extra: Map::new(),
        }
    }
}

impl Entity for Animal {
    const TABLE: Table = Table::Animals;

    fn key(&self) -> &str {
        &self.id
    }
}

/// Treatment or observation recorded for an animal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub description: String,
}

/// Group of animals managed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalBatch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub animal_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnimalBatch {
    #[must_use]
    pub fn new(name: impl Into<String>, animal_ids: Vec<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            species: None,
            animal_ids,
            updated_at: Utc::now(),
            extra: Map::new(),
        }
    }
}

impl Entity for AnimalBatch {
    const TABLE: Table = Table::AnimalBatches;

    fn key(&self) -> &str {
        &self.id
    }
}
