//! furrow-core - Core library for Furrow
//!
//! Offline-first farm records: typed models, the local `SQLite` store, the
//! outbound sync queue, the sync manager with conflict handling, and the
//! bulk worker. Clients drive everything through [`services::FarmService`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;
pub mod worker;

pub use error::{Error, Result};
pub use models::{Record, Table};
pub use services::{DatabaseService, FarmService};
pub use state::{SyncSnapshot, SyncStatus};
pub use sync::{RemoteAuthority, RestRemote, SyncManager};
