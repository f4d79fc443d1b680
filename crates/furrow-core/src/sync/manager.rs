//! Sync manager: drains the outbound queue and takes in remote changes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::conflict::{self, RemoteChange};
use super::health::{self, AlertSink, TracingAlertSink};
use super::mapping::{from_remote_keys, outbound_payload, resolve_resource};
use super::remote::{RemoteAuthority, RemoteError};
use crate::config::SyncConfig;
use crate::models::{
    into_record, Action, NewOperation, Notification, QueueOperation, QueueStatus, Record,
    Resource, Severity, Table,
};
use crate::services::DatabaseService;
use crate::state::{SyncSnapshot, SyncStatus};
use crate::Result;

/// Why a drain did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

/// Outcome of one [`SyncManager::drain`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Rows acknowledged by the remote
    pub pushed: usize,
    /// Rows dequeued without a push (no remote resource)
    pub local_only: usize,
    /// Rows rejected in this drain, including those that went dead
    pub failed: usize,
    /// Rows that exhausted their retry budget in this drain
    pub dead: usize,
    /// Passes over the queue
    pub passes: usize,
    /// Connectivity was lost before the queue was worked through
    pub interrupted: bool,
    pub skipped: Option<SkipReason>,
}

/// Outcome of one [`SyncManager::reconcile`] pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub applied: usize,
    pub conflicts: usize,
    pub unchanged: usize,
    /// Resources whose fetch failed
    pub failed_resources: Vec<Resource>,
}

enum PushOutcome {
    Acknowledged,
    LocalOnly,
    Rejected(String),
}

/// Clears the single-flight flag when the drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner<R> {
    store: DatabaseService,
    remote: R,
    config: SyncConfig,
    alerts: Arc<dyn AlertSink>,
    online: AtomicBool,
    draining: AtomicBool,
    status: watch::Sender<SyncSnapshot>,
    last_pull: Mutex<Option<DateTime<Utc>>>,
}

/// Pushes queued operations to the remote authority and keeps the status
/// channel current. Cheap to clone; clones share state.
pub struct SyncManager<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteAuthority> SyncManager<R> {
    pub fn new(store: DatabaseService, remote: R, config: SyncConfig) -> Self {
        Self::with_alert_sink(store, remote, config, Arc::new(TracingAlertSink))
    }

    pub fn with_alert_sink(
        store: DatabaseService,
        remote: R,
        config: SyncConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (status, _) = watch::channel(SyncSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                config,
                alerts,
                online: AtomicBool::new(true),
                draining: AtomicBool::new(false),
                status,
                last_pull: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &DatabaseService {
        &self.inner.store
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.status.subscribe()
    }

    /// Recover from an interrupted drain and publish the initial snapshot.
    ///
    /// Rows left `syncing` by a crash go back to `pending`.
    pub async fn start(&self) -> Result<()> {
        let reset = self.inner.store.queue_reset_in_flight().await?;
        if reset > 0 {
            tracing::warn!("Reset {reset} interrupted queue row(s) to pending");
        }
        self.refresh_snapshot().await;
        Ok(())
    }

    /// Append an operation to the queue and drain in the background when
    /// online.
    pub async fn enqueue(&self, operation: NewOperation) -> Result<QueueOperation> {
        let queued = self.inner.store.append_operation(operation).await?;
        tracing::debug!("Queued {} #{}", queued.operation, queued.id);
        self.notify_enqueued().await;
        Ok(queued)
    }

    /// Called after rows were appended by another path (e.g. a mutation
    /// that wrote its record and queue row together).
    pub async fn notify_enqueued(&self) {
        self.refresh_snapshot().await;
        if self.is_online() {
            self.spawn_drain();
        }
    }

    /// Report a connectivity transition. Regaining connectivity drains
    /// immediately.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::AcqRel);
        if online {
            if !was_online {
                tracing::info!("Connectivity restored");
                self.set_status(SyncStatus::Idle);
            }
            self.spawn_drain();
        } else {
            if was_online {
                tracing::info!("Connectivity lost");
            }
            self.set_status(SyncStatus::Offline);
        }
    }

    fn spawn_drain(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.drain().await;
        });
    }

    /// Push queued operations until none that were present when the drain
    /// began (or arrived during it) remain. Never fails; problems are
    /// recorded on the rows and in the report.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let Some(_guard) = DrainGuard::acquire(&self.inner.draining) else {
            report.skipped = Some(SkipReason::AlreadyRunning);
            return report;
        };
        if !self.is_online() {
            self.set_status(SyncStatus::Offline);
            report.skipped = Some(SkipReason::Offline);
            return report;
        }

        let mut floor = 0;
        loop {
            let ceiling = match self.inner.store.queue_max_id().await {
                Ok(ceiling) => ceiling,
                Err(error) => return self.fail_drain(report, &error),
            };
            let rows = match self.inner.store.queue_eligible().await {
                Ok(rows) => rows
                    .into_iter()
                    .filter(|row| row.id > floor && row.id <= ceiling)
                    .collect::<Vec<_>>(),
                Err(error) => return self.fail_drain(report, &error),
            };
            if rows.is_empty() {
                break;
            }

            self.set_status(SyncStatus::Syncing);
            report.passes += 1;
            for row in rows {
                if !self.is_online() {
                    tracing::info!("Drain interrupted by connectivity loss");
                    report.interrupted = true;
                    self.set_status(SyncStatus::Offline);
                    self.refresh_snapshot().await;
                    return report;
                }
                if let Err(error) = self.process_row(&row, &mut report).await {
                    return self.fail_drain(report, &error);
                }
            }

            floor = ceiling;
            match self.inner.store.queue_max_id().await {
                Ok(latest) if latest > ceiling => {
                    tracing::debug!("Rows arrived during the drain, running another pass");
                }
                Ok(_) => break,
                Err(error) => return self.fail_drain(report, &error),
            }
        }

        if report.passes > 0 {
            tracing::info!(
                "Drain finished: {} pushed, {} local only, {} failed, {} dead",
                report.pushed,
                report.local_only,
                report.failed,
                report.dead
            );
        }
        if self.is_online() {
            self.inner.status.send_modify(|snapshot| {
                snapshot.status = SyncStatus::Idle;
                snapshot.last_sync_time = Some(Utc::now());
            });
        } else {
            tracing::info!("Connectivity lost during the final push");
            self.set_status(SyncStatus::Offline);
        }
        self.refresh_snapshot().await;
        report
    }

    async fn process_row(&self, row: &QueueOperation, report: &mut DrainReport) -> Result<()> {
        let store = &self.inner.store;
        if !store.queue_mark_syncing(row.id).await? {
            tracing::debug!("Skipping {} #{}: no longer queued", row.operation, row.id);
            return Ok(());
        }

        match self.push(row).await {
            PushOutcome::Acknowledged => {
                tracing::debug!("Pushed {} #{}", row.operation, row.id);
                store.queue_remove(row.id).await?;
                report.pushed += 1;
            }
            PushOutcome::LocalOnly => {
                tracing::debug!("Dequeued local-only {} #{}", row.operation, row.id);
                store.queue_remove(row.id).await?;
                report.local_only += 1;
            }
            PushOutcome::Rejected(error) => {
                tracing::warn!("Push of {} #{} failed: {error}", row.operation, row.id);
                let Some(status) = store
                    .queue_mark_failed(row.id, &error, self.inner.config.max_attempts)
                    .await?
                else {
                    tracing::debug!("{} #{} was dequeued while in flight", row.operation, row.id);
                    return Ok(());
                };
                report.failed += 1;
                if status == QueueStatus::Dead {
                    report.dead += 1;
                    self.raise_dead_letter(row, &error).await?;
                }
            }
        }
        Ok(())
    }

    async fn push(&self, row: &QueueOperation) -> PushOutcome {
        let Some(resource) = resolve_resource(&row.operation) else {
            return PushOutcome::LocalOnly;
        };

        let remote = &self.inner.remote;
        let call = async {
            if row.action() == Some(Action::Delete) {
                let id = row.target_entity_id().ok_or_else(|| {
                    RemoteError::InvalidPayload("delete without an entity id".to_string())
                })?;
                remote.delete(resource, &id).await
            } else {
                let payload = outbound_payload(&row.operation, resource, &row.data);
                remote.upsert(resource, &payload).await
            }
        };

        let timeout = self.inner.config.push_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => PushOutcome::Acknowledged,
            Ok(Err(error)) => PushOutcome::Rejected(error.to_string()),
            Err(_) => PushOutcome::Rejected(RemoteError::Timeout(timeout).to_string()),
        }
    }

    async fn raise_dead_letter(&self, row: &QueueOperation, error: &str) -> Result<()> {
        let attempts = self.inner.config.max_attempts.unwrap_or_default();
        tracing::warn!(
            "Giving up on {} #{} after {attempts} attempt(s)",
            row.operation,
            row.id
        );
        let notification = Notification::new(
            Severity::Warning,
            "Change could not be synced",
            format!(
                "{} for {} was rejected {attempts} time(s): {error}",
                row.operation,
                row.target_entity_id().unwrap_or_else(|| "unknown record".to_string())
            ),
        );
        self.inner.store.put(&notification).await
    }

    fn fail_drain(&self, report: DrainReport, error: &crate::Error) -> DrainReport {
        tracing::error!("Drain stopped on local storage failure: {error}");
        self.set_status(SyncStatus::Error);
        report
    }

    /// Give dead rows a fresh retry budget and drain them.
    pub async fn requeue_dead(&self) -> Result<usize> {
        let requeued = self.inner.store.queue_requeue_dead().await?;
        if requeued > 0 {
            tracing::info!("Requeued {requeued} dead row(s)");
            self.notify_enqueued().await;
        }
        Ok(requeued)
    }

    /// Take in a record pushed by the remote (realtime notification or
    /// pull). Keys must already be local camelCase keys.
    pub async fn on_remote_change(&self, table: Table, record: Record) -> Result<RemoteChange> {
        let change = conflict::detect(&self.inner.store, table, record).await?;
        if matches!(change, RemoteChange::Conflict { new: true }) {
            self.refresh_snapshot().await;
        }
        Ok(change)
    }

    /// Pull rows changed remotely since the last successful pull and feed
    /// them through conflict detection.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if !self.is_online() {
            return report;
        }

        let started = Utc::now();
        let since = *self
            .inner
            .last_pull
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for resource in Resource::ALL {
            let rows = match self.inner.remote.fetch_since(resource, since).await {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!("Pull of {resource} failed: {error}");
                    report.failed_resources.push(resource);
                    continue;
                }
            };

            for row in rows {
                let record = match into_record(from_remote_keys(resource, &row)) {
                    Ok(record) => record,
                    Err(error) => {
                        tracing::debug!("Skipping malformed {resource} row: {error}");
                        continue;
                    }
                };
                match self.on_remote_change(resource.table(), record).await {
                    Ok(RemoteChange::Applied) => report.applied += 1,
                    Ok(RemoteChange::Conflict { .. }) => report.conflicts += 1,
                    Ok(RemoteChange::Unchanged | RemoteChange::AlreadyResolved) => {
                        report.unchanged += 1;
                    }
                    Err(error) => tracing::warn!("Could not apply {resource} row: {error}"),
                }
            }
        }

        if report.failed_resources.is_empty() {
            *self
                .inner
                .last_pull
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(started);
        }
        self.refresh_snapshot().await;
        report
    }

    /// Scan field sensors and raise alerts for silent ones.
    pub async fn health_sweep(&self) -> Result<Vec<Notification>> {
        health::sweep(
            &self.inner.store,
            self.inner.alerts.as_ref(),
            self.inner.config.sensor_silence,
            Utc::now(),
        )
        .await
    }

    /// One timer cycle: drain, pull, then the health sweep.
    pub async fn tick(&self) {
        self.drain().await;
        self.reconcile().await;
        if let Err(error) = self.health_sweep().await {
            tracing::error!("Health sweep failed: {error}");
        }
    }

    /// Run timer cycles every `sync_interval` until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.start().await?;
        let mut interval = tokio::time::interval(self.inner.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Sync loop stopped");
                    return Ok(());
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    fn set_status(&self, status: SyncStatus) {
        self.inner.status.send_if_modified(|snapshot| {
            let changed = snapshot.status != status;
            snapshot.status = status;
            changed
        });
    }

    /// Re-read queue and conflict counts into the snapshot.
    pub async fn refresh_snapshot(&self) {
        let store = &self.inner.store;
        let counts = async {
            let pending = store.queue_outstanding().await?;
            let conflicts = store.count_conflicts().await?;
            Ok::<_, crate::Error>((pending, conflicts))
        };
        match counts.await {
            Ok((pending, conflicts)) => {
                self.inner.status.send_if_modified(|snapshot| {
                    let changed = snapshot.pending_operations != pending
                        || snapshot.open_conflicts != conflicts;
                    snapshot.pending_operations = pending;
                    snapshot.open_conflicts = conflicts;
                    changed
                });
            }
            Err(error) => tracing::error!("Could not read sync counts: {error}"),
        }
    }
}
