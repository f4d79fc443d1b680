//! Outbound queue draining, remote change intake and conflict handling.

pub mod conflict;
mod health;
pub mod mapping;
mod manager;
mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use conflict::{remote_version, RemoteChange};
pub use health::{sweep as health_sweep, AlertSink, TracingAlertSink};
pub use manager::{DrainReport, ReconcileReport, SkipReason, SyncManager};
pub use remote::{RemoteAuthority, RemoteError, RemoteResult, RestRemote};
