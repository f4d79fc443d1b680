//! Async services shared by clients.

mod database;
mod farm;
mod projection;
mod tiles;

pub use database::{DatabaseService, StoreEvent};
pub use farm::{BatchAction, FarmService, HarvestRequest, SaleRequest};
pub use projection::TableProjection;
pub use tiles::TileCache;
