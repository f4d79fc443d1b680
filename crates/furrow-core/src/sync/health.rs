//! Periodic scan for silent field sensors.

use chrono::{DateTime, Utc};

use crate::models::{from_record, Field, Notification, Severity, Table};
use crate::services::DatabaseService;
use crate::Result;

/// Side effect fired when a critical notification is raised
/// (haptics, desktop alert, ...).
pub trait AlertSink: Send + Sync {
    fn alert(&self, notification: &Notification);
}

/// Alert sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, notification: &Notification) {
        tracing::warn!(
            sensor = notification.sensor_id.as_deref().unwrap_or_default(),
            "{}: {}",
            notification.title,
            notification.message
        );
    }
}

/// Raise a critical notification for every sensor silent for longer than
/// `threshold`, unless an unread one already exists for that sensor.
///
/// Returns the notifications created by this sweep.
pub async fn sweep(
    store: &DatabaseService,
    alerts: &dyn AlertSink,
    threshold: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    let mut existing = store.list::<Notification>().await?;
    let mut raised = Vec::new();

    for record in store.list_records(Table::Fields).await? {
        let field = match from_record::<Field>(record) {
            Ok(field) => field,
            Err(error) => {
                tracing::debug!("Skipping unreadable field record: {error}");
                continue;
            }
        };

        for sensor in field.sensors.iter().filter(|sensor| sensor.is_silent(now, threshold)) {
            if existing
                .iter()
                .any(|notification| notification.is_open_critical_for(&sensor.id))
            {
                continue;
            }

            let hours = (now - sensor.last_seen).num_hours();
            let notification = Notification::new(
                Severity::Critical,
                format!("Sensor {} offline", sensor.name),
                format!("No data from {} on {} for {hours} h", sensor.name, field.name),
            )
            .for_sensor(&sensor.id);

            store.put(&notification).await?;
            alerts.alert(&notification);
            existing.push(notification.clone());
            raised.push(notification);
        }
    }

    if !raised.is_empty() {
        tracing::info!("Health sweep raised {} sensor alert(s)", raised.len());
    }
    Ok(raised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sensor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl AlertSink for CountingSink {
        fn alert(&self, _notification: &Notification) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sensor(id: &str, last_seen: DateTime<Utc>) -> Sensor {
        Sensor {
            id: id.to_string(),
            name: format!("probe {id}"),
            kind: "soil-moisture".to_string(),
            last_seen,
            battery: None,
        }
    }

    async fn seed_field(store: &DatabaseService, now: DateTime<Utc>) {
        let mut field = Field::new("North", 4.0);
        field.sensors = vec![
            sensor("s1", now - chrono::Duration::hours(30)),
            sensor("s2", now - chrono::Duration::hours(2)),
        ];
        store.put(&field).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_sweeps_alert_once_per_sensor() {
        let store = DatabaseService::open_in_memory().unwrap();
        let sink = CountingSink::default();
        let now = Utc::now();
        seed_field(&store, now).await;

        let threshold = chrono::Duration::hours(24);
        let first = sweep(&store, &sink, threshold, now).await.unwrap();
        let second = sweep(&store, &sink, threshold, now).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sensor_id.as_deref(), Some("s1"));
        assert!(second.is_empty());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.list::<Notification>().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reading_the_alert_allows_a_new_one() {
        let store = DatabaseService::open_in_memory().unwrap();
        let sink = CountingSink::default();
        let now = Utc::now();
        seed_field(&store, now).await;

        let threshold = chrono::Duration::hours(24);
        let mut alert = sweep(&store, &sink, threshold, now).await.unwrap().remove(0);
        alert.read = true;
        store.put(&alert).await.unwrap();

        assert_eq!(sweep(&store, &sink, threshold, now).await.unwrap().len(), 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_never_mutates_sensors() {
        let store = DatabaseService::open_in_memory().unwrap();
        let now = Utc::now();
        seed_field(&store, now).await;
        let before = store.list::<Field>().await.unwrap();

        sweep(&store, &TracingAlertSink, chrono::Duration::hours(24), now)
            .await
            .unwrap();
        assert_eq!(store.list::<Field>().await.unwrap(), before);
    }
}
