//! Mutation API used by clients.
//!
//! Every mutation writes the full post-change record to the local store and
//! queues it in the same transaction. Composite mutations are sequences of
//! those primitives and are not atomic across entities.

use chrono::Utc;
use serde_json::Value;

use super::DatabaseService;
use crate::models::{
    from_record, merge, new_id, record_key, stamp, to_record, Animal, AnimalBatch, Conflict,
    ConflictChoice, ConflictResolution, Entity, Field, FieldStatus, HarvestBatch, HealthRecord,
    NewOperation, Notification, Record, StockItem, Table, Transaction, TransactionKind,
};
use crate::sync::{conflict, RemoteAuthority, SyncManager};
use crate::{Error, Result};

/// Stock leaving the farm for money.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRequest {
    pub stock_id: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub buyer: Option<String>,
}

/// Crop taken off a field.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestRequest {
    pub field_id: String,
    pub quantity: f64,
    pub unit: String,
}

/// Action applied to every animal of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchAction {
    Vaccinate { vaccine: String },
    Move { location: String },
    Feed { stock_id: String, quantity_per_animal: f64 },
}

pub struct FarmService<R> {
    store: DatabaseService,
    sync: SyncManager<R>,
}

impl<R> Clone for FarmService<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            sync: self.sync.clone(),
        }
    }
}

impl<R: RemoteAuthority> FarmService<R> {
    pub fn new(sync: SyncManager<R>) -> Self {
        Self {
            store: sync.store().clone(),
            sync,
        }
    }

    pub fn store(&self) -> &DatabaseService {
        &self.store
    }

    pub fn sync(&self) -> &SyncManager<R> {
        &self.sync
    }

    // ---------------------------------------------------------------------
    // Primitives
    // ---------------------------------------------------------------------

    /// Insert a new record. A missing key is generated.
    pub async fn add_entity(&self, table: Table, mut record: Record) -> Result<Record> {
        let key = match record_key(table, &record) {
            Some(key) => key.to_string(),
            None => {
                let key = new_id();
                record.insert(table.key_field().to_string(), Value::String(key.clone()));
                key
            }
        };
        stamp(&mut record, Utc::now());

        if table.resource().is_some() {
            let operation = NewOperation::add(table, &key, &record);
            self.store
                .put_and_enqueue(table, record.clone(), operation)
                .await?;
            self.sync.notify_enqueued().await;
        } else {
            self.store.put_record(table, record.clone()).await?;
        }
        Ok(record)
    }

    /// Merge `updates` into the stored record and queue the merged result.
    pub async fn update_entity(&self, table: Table, id: &str, updates: Record) -> Result<Record> {
        let mut record = self
            .store
            .get_record(table, id)
            .await?
            .ok_or_else(|| Error::not_found(table, id))?;
        merge(&mut record, &updates);
        record.insert(table.key_field().to_string(), Value::String(id.to_string()));
        self.write_update(table, id, record).await
    }

    /// Remove a record locally and queue the remote delete.
    pub async fn delete_entity(&self, table: Table, id: &str) -> Result<()> {
        if table.resource().is_some() {
            self.store
                .delete_and_enqueue(table, id, NewOperation::delete(table, id))
                .await?;
            self.sync.notify_enqueued().await;
        } else if !self.store.delete_record(table, id).await? {
            return Err(Error::not_found(table, id));
        }
        Ok(())
    }

    async fn write_update(&self, table: Table, id: &str, mut record: Record) -> Result<Record> {
        stamp(&mut record, Utc::now());
        if table.resource().is_some() {
            let operation = NewOperation::update(table, id, &record);
            self.store
                .put_and_enqueue(table, record.clone(), operation)
                .await?;
            self.sync.notify_enqueued().await;
        } else {
            self.store.put_record(table, record.clone()).await?;
        }
        Ok(record)
    }

    /// Insert a typed entity.
    pub async fn add<T: Entity>(&self, entity: &T) -> Result<T> {
        from_record(self.add_entity(T::TABLE, to_record(entity)?).await?)
    }

    /// Replace a typed entity with its new state.
    pub async fn save<T: Entity>(&self, entity: &T) -> Result<T> {
        let key = entity.key().to_string();
        if self.store.get_record(T::TABLE, &key).await?.is_none() {
            return Err(Error::not_found(T::TABLE, key));
        }
        from_record(self.write_update(T::TABLE, &key, to_record(entity)?).await?)
    }

    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        self.store.get(id).await
    }

    pub async fn list<T: Entity>(&self) -> Result<Vec<T>> {
        self.store.list().await
    }

    // ---------------------------------------------------------------------
    // Composite mutations
    // ---------------------------------------------------------------------

    pub async fn toggle_irrigation(&self, field_id: &str, on: bool) -> Result<Field> {
        let mut field: Field = self.store.require(field_id).await?;
        field.irrigation_active = on;
        field.log(
            "irrigation",
            if on {
                "Irrigation started"
            } else {
                "Irrigation stopped"
            },
        );
        self.save(&field).await
    }

    /// Sell stock: decrement the item and book the income.
    pub async fn register_sale(&self, request: SaleRequest) -> Result<Transaction> {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(Error::InvalidInput(
                "sale quantity must be a positive number".to_string(),
            ));
        }
        if !(request.unit_price.is_finite() && request.unit_price >= 0.0) {
            return Err(Error::InvalidInput(
                "unit price must not be negative".to_string(),
            ));
        }

        let mut stock: StockItem = self.store.require(&request.stock_id).await?;
        take_from_stock(&mut stock, request.quantity)?;
        let stock = self.save(&stock).await?;

        let mut transaction = Transaction::new(
            TransactionKind::Income,
            request.quantity * request.unit_price,
            "sales",
        );
        transaction.description = match &request.buyer {
            Some(buyer) => format!(
                "Sold {} {} of {} to {buyer}",
                request.quantity, stock.unit, stock.name
            ),
            None => format!("Sold {} {} of {}", request.quantity, stock.unit, stock.name),
        };
        transaction.related_stock_id = Some(stock.id.clone());
        self.add(&transaction).await
    }

    /// Record a harvest: local harvest batch, stock increment, field log
    /// and status change.
    pub async fn harvest_field(&self, request: HarvestRequest) -> Result<HarvestBatch> {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(Error::InvalidInput(
                "harvest quantity must be a positive number".to_string(),
            ));
        }

        let mut field: Field = self.store.require(&request.field_id).await?;
        let crop = field.crop.clone().ok_or_else(|| {
            Error::InvalidInput(format!("field '{}' has no crop to harvest", field.name))
        })?;

        let existing = self
            .store
            .list::<StockItem>()
            .await?
            .into_iter()
            .find(|item| item.name.eq_ignore_ascii_case(&crop) && item.unit == request.unit);
        let stock = match existing {
            Some(mut item) => {
                item.quantity += request.quantity;
                self.save(&item).await?
            }
            None => {
                let mut item = StockItem::new(crop.clone(), request.quantity, request.unit.clone());
                item.category = Some("harvest".to_string());
                self.add(&item).await?
            }
        };

        let now = Utc::now();
        let batch = HarvestBatch {
            batch_id: new_id(),
            field_id: field.id.clone(),
            crop: crop.clone(),
            quantity: request.quantity,
            unit: request.unit.clone(),
            harvested_at: now,
            stock_id: Some(stock.id.clone()),
            updated_at: now,
            extra: serde_json::Map::new(),
        };
        let batch = self.add(&batch).await?;

        field.log(
            "harvest",
            format!("Harvested {} {} of {crop}", request.quantity, request.unit),
        );
        field.status = FieldStatus::Harvested;
        self.save(&field).await?;
        Ok(batch)
    }

    /// Apply an action to every animal of a batch. Returns the number of
    /// animals updated; ids with no stored animal are skipped.
    pub async fn apply_batch_action(&self, batch_id: &str, action: BatchAction) -> Result<usize> {
        let batch: AnimalBatch = self.store.require(batch_id).await?;
        let mut animals = Vec::with_capacity(batch.animal_ids.len());
        for id in &batch.animal_ids {
            match self.store.get::<Animal>(id).await? {
                Some(animal) => animals.push(animal),
                None => tracing::warn!("Batch {batch_id} lists missing animal {id}"),
            }
        }

        if let BatchAction::Feed {
            stock_id,
            quantity_per_animal,
        } = &action
        {
            let mut stock: StockItem = self.store.require(stock_id).await?;
            #[allow(clippy::cast_precision_loss)]
            let total = quantity_per_animal * animals.len() as f64;
            take_from_stock(&mut stock, total)?;
            self.save(&stock).await?;
        }

        let now = Utc::now();
        for animal in &mut animals {
            match &action {
                BatchAction::Vaccinate { vaccine } => animal.health_records.push(HealthRecord {
                    at: now,
                    kind: "vaccination".to_string(),
                    description: vaccine.clone(),
                }),
                BatchAction::Move { location } => animal.location = Some(location.clone()),
                BatchAction::Feed {
                    quantity_per_animal,
                    ..
                } => animal.health_records.push(HealthRecord {
                    at: now,
                    kind: "feeding".to_string(),
                    description: format!("Fed {quantity_per_animal}"),
                }),
            }
            self.save(&*animal).await?;
        }
        Ok(animals.len())
    }

    // ---------------------------------------------------------------------
    // Conflicts and notifications
    // ---------------------------------------------------------------------

    /// Open conflicts, oldest first.
    pub async fn pending_conflicts(&self) -> Result<Vec<Conflict>> {
        self.store.list_conflicts().await
    }

    /// The conflict the user should settle next.
    pub async fn next_conflict(&self) -> Result<Option<Conflict>> {
        Ok(self.store.list_conflicts().await?.into_iter().next())
    }

    pub async fn resolve_conflict(
        &self,
        entity_id: &str,
        choice: ConflictChoice,
    ) -> Result<ConflictResolution> {
        let resolution = conflict::resolve(&self.store, entity_id, choice).await?;
        self.sync.refresh_snapshot().await;
        Ok(resolution)
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<Notification> {
        let mut notification: Notification = self.store.require(id).await?;
        notification.read = true;
        notification.updated_at = Utc::now();
        self.store.put(&notification).await?;
        Ok(notification)
    }
}

fn take_from_stock(stock: &mut StockItem, quantity: f64) -> Result<()> {
    if stock.quantity < quantity {
        return Err(Error::InsufficientStock {
            item: stock.name.clone(),
            requested: quantity,
            available: stock.quantity,
        });
    }
    stock.quantity -= quantity;
    Ok(())
}
