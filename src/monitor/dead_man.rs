//! Daily scan for silent sensors.

use crate::alerts::digest::DigestTable;
use crate::cache::ActiveSensorCache;
use crate::config::DeadManConfig;
use crate::error::GatewayResult;
use crate::gate::IngestionGate;
use crate::notify::Notifier;
use crate::storage::SensorDirectory;
use chrono::{DateTime, Local, Timelike};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadManReport {
    /// Sensors past the staleness threshold
    pub stale: usize,
    /// Notifications delivered
    pub sent: usize,
    /// Notifications that failed or had no recipient
    pub failed: usize,
}

/// Once-a-day report of sensors that stopped reporting.
pub struct DeadManMonitor {
    config: DeadManConfig,
    admin_recipients: Vec<String>,
    cache: Arc<ActiveSensorCache>,
    directory: Arc<dyn SensorDirectory>,
    gate: IngestionGate,
    notifier: Arc<dyn Notifier>,
    armed: AtomicBool,
}

impl std::fmt::Debug for DeadManMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadManMonitor")
            .field("config", &self.config)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

struct ExperimentDigest {
    recipients: Vec<String>,
    table: DigestTable,
}

impl DeadManMonitor {
    /// Monitor reporting through `notifier`.
    pub fn new(
        config: DeadManConfig,
        admin_recipients: Vec<String>,
        cache: Arc<ActiveSensorCache>,
        directory: Arc<dyn SensorDirectory>,
        gate: IngestionGate,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            admin_recipients,
            cache,
            directory,
            gate,
            notifier,
            armed: AtomicBool::new(true),
        }
    }

    /// Whether a tick at `now` should scan. True once per visit of the scan hour.
    pub fn should_run(&self, now: DateTime<Local>) -> bool {
        if now.hour() == self.config.scan_hour {
            self.armed.swap(false, Ordering::SeqCst)
        } else {
            self.armed.store(true, Ordering::SeqCst);
            false
        }
    }

    /// Minute tick: scan if this is the first tick of the scan hour.
    pub async fn tick(&self, now: DateTime<Local>) -> GatewayResult<Option<DeadManReport>> {
        if !self.should_run(now) {
            return Ok(None);
        }
        self.scan(now).await.map(Some)
    }

    /// Refresh the cache and report every silent, non-faulty sensor.
    pub async fn scan(&self, now: DateTime<Local>) -> GatewayResult<DeadManReport> {
        self.cache.refresh(self.directory.as_ref(), &self.gate).await?;

        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let mut digests: BTreeMap<String, ExperimentDigest> = BTreeMap::new();
        let mut report = DeadManReport::default();

        for entry in self.cache.entries().await {
            if entry.faulty {
                continue;
            }
            let Some(last_seen) = entry.last_reading_at else {
                continue;
            };
            let elapsed = now.signed_duration_since(last_seen);
            if elapsed <= stale_after {
                continue;
            }
            report.stale += 1;
            let digest = digests
                .entry(entry.collection_name.clone())
                .or_insert_with(|| ExperimentDigest {
                    recipients: entry.recipients(),
                    table: DigestTable::new(
                        format!("Silent sensors in {}", entry.collection_name),
                        vec!["Sensor", "Location", "Last seen", "Minutes silent"],
                    )
                    .highlight(3),
                });
            digest.table.push_row(vec![
                entry.address.clone(),
                entry.location.clone(),
                last_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
                elapsed.num_minutes().to_string(),
            ]);
        }

        for (experiment, digest) in digests {
            let recipients = if digest.recipients.is_empty() {
                self.admin_recipients.clone()
            } else {
                digest.recipients
            };
            if recipients.is_empty() {
                tracing::warn!(%experiment, "No recipients for dead-man digest");
                report.failed += 1;
                continue;
            }
            let subject = format!("Sensors silent in {experiment}");
            match self
                .notifier
                .send(&recipients, &subject, &digest.table.to_html())
                .await
            {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::error!(%experiment, error = %e, "Dead-man digest delivery failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(stale = report.stale, sent = report.sent, "Dead-man scan complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ActiveSensorInfo;
    use crate::notify::RecordingNotifier;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 5, 4, h, m, 0).single().unwrap()
    }

    fn sensor(address: &str, last: Option<DateTime<Local>>, faulty: bool) -> ActiveSensorInfo {
        let mut info = ActiveSensorInfo::new(address, "expA");
        info.alert_email = "grower@example.org".to_string();
        info.last_reading_at = last;
        info.faulty = faulty;
        info
    }

    fn monitor(sensors: Vec<ActiveSensorInfo>) -> (DeadManMonitor, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = DeadManMonitor::new(
            DeadManConfig::default(),
            vec![],
            Arc::new(ActiveSensorCache::new()),
            Arc::new(MemoryStore::with_sensors(sensors)),
            IngestionGate::new(),
            notifier.clone(),
        );
        (monitor, notifier)
    }

    #[tokio::test]
    async fn test_scan_reports_only_stale_healthy_sensors() {
        let now = at(8, 0);
        let (monitor, notifier) = monitor(vec![
            sensor("fd00::1", Some(at(6, 0)), false),
            sensor("fd00::2", Some(at(7, 50)), false),
            sensor("fd00::3", Some(at(1, 0)), true),
            sensor("fd00::4", None, false),
        ]);

        let report = monitor.scan(now).await.unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(report.sent, 1);

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("fd00::1"));
        assert!(sent[0].body.contains("<td class=\"alert\">120</td>"));
        assert!(!sent[0].body.contains("fd00::3"));
    }

    #[tokio::test]
    async fn test_runs_once_per_scan_hour() {
        let (monitor, _notifier) = monitor(vec![]);
        assert!(!monitor.should_run(at(7, 59)));
        assert!(monitor.should_run(at(8, 0)));
        assert!(!monitor.should_run(at(8, 1)));
        assert!(!monitor.should_run(at(8, 59)));
        assert!(!monitor.should_run(at(9, 0)));
        assert!(monitor.should_run(at(8, 0)));
    }

    #[tokio::test]
    async fn test_tick_outside_hour_does_nothing() {
        let (monitor, notifier) = monitor(vec![sensor("fd00::1", Some(at(1, 0)), false)]);
        assert!(monitor.tick(at(12, 0)).await.unwrap().is_none());
        assert!(notifier.sent().await.is_empty());
    }
}
