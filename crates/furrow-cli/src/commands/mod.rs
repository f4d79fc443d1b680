pub mod add;
pub mod common;
pub mod config;
pub mod delete;
pub mod farm;
pub mod list;
pub mod queue;
pub mod stress;
pub mod sync;
pub mod tiles;
pub mod update;
