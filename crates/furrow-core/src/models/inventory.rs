//! Stock, money and harvest models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_id, Entity, Table};

/// Item held in stock (feed, seed, produce, chemicals)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    /// Quantity below which the item counts as running low
    #[serde(default)]
    pub min_threshold: Option<f64>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StockItem {
    #[must_use]
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            category: None,
            quantity,
            unit: unit.into(),
            min_threshold: None,
            updated_at: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Whether the quantity has dropped below the configured threshold
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.min_threshold
            .is_some_and(|threshold| self.quantity < threshold)
    }
}

impl Entity for StockItem {
    const TABLE: Table = Table::Stocks;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// Money in or out of the farm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub related_stock_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    #[must_use]
    pub fn new(kind: TransactionKind, amount: f64, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            kind,
            amount,
            category: category.into(),
            description: String::new(),
            date: now,
            related_stock_id: None,
            updated_at: now,
            extra: Map::new(),
        }
    }
}

impl Entity for Transaction {
    const TABLE: Table = Table::Transactions;

    fn key(&self) -> &str {
        &self.id
    }
}

/// Harvested product batch, keyed by its batch id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestBatch {
    pub batch_id: String,
    pub field_id: String,
    pub crop: String,
    pub quantity: f64,
    pub unit: String,
    pub harvested_at: DateTime<Utc>,
    #[serde(default)]
    pub stock_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for HarvestBatch {
    const TABLE: Table = Table::Harvests;

    fn key(&self) -> &str {
        &self.batch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_is_low() {
        let mut item = StockItem::new("Hay", 5.0, "bale");
        assert!(!item.is_low());
        item.min_threshold = Some(10.0);
        assert!(item.is_low());
    }

    #[test]
    fn test_transaction_kind_serializes_lowercase() {
        let tx = Transaction::new(TransactionKind::Income, 12.5, "sale");
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["kind"], "income");
        assert!(value.get("relatedStockId").is_some());
    }
}
