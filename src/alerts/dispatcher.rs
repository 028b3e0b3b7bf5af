//! Periodic delivery of accumulated violations.

use super::digest::{violation_subject, violation_table};
use super::evaluator::{AlertEvaluator, CounterKey, ExperimentAlertAccumulator, ViolationRecord};
use crate::config::AlertConfig;
use crate::notify::Notifier;
use crate::scheduler::AlignedSchedule;
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Experiments that had pending violations
    pub experiments: usize,
    /// Notifications delivered
    pub sent: usize,
    /// Digest rows across all delivered notifications
    pub lines: usize,
    /// Lines dropped for exceeding the repeat cap
    pub capped: usize,
    /// Notifications that failed or had nobody to go to
    pub failed: usize,
}

/// Drains accumulators into one digest per experiment.
pub struct AlertDispatcher {
    config: AlertConfig,
    alerts: Arc<Mutex<AlertEvaluator>>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertDispatcher {
    /// Dispatcher over the shared evaluator state.
    pub fn new(
        config: AlertConfig,
        alerts: Arc<Mutex<AlertEvaluator>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            alerts,
            notifier,
        }
    }

    /// Send one digest per experiment with recent violations and clear every accumulator.
    pub async fn dispatch(&self, now: DateTime<Local>) -> DispatchReport {
        let (pending, counters) = self.alerts.lock().await.take_pending();
        let since = AlignedSchedule::new(self.config.sub_interval).floor(now);
        let mut report = DispatchReport {
            experiments: pending.len(),
            ..Default::default()
        };

        for (experiment, accumulator) in pending {
            let (lines, capped) = self.select_lines(&accumulator, &counters, since);
            report.capped += capped;
            if lines.is_empty() {
                tracing::debug!(%experiment, capped, "Nothing to send for experiment");
                continue;
            }

            let recipients = if accumulator.recipients.is_empty() {
                self.config.admin_recipients.clone()
            } else {
                accumulator.recipients.clone()
            };
            if recipients.is_empty() {
                tracing::warn!(%experiment, "No recipients for alert digest; dropping it");
                report.failed += 1;
                continue;
            }

            let body = violation_table(&experiment, &lines).to_html();
            match self
                .notifier
                .send(&recipients, &violation_subject(&experiment), &body)
                .await
            {
                Ok(()) => {
                    tracing::info!(%experiment, lines = lines.len(), "Alert digest sent");
                    report.sent += 1;
                    report.lines += lines.len();
                }
                Err(e) => {
                    tracing::error!(%experiment, error = %e, "Alert digest delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Latest line per `(address, metric)` inside the sub-interval, minus capped pairs.
    fn select_lines(
        &self,
        accumulator: &ExperimentAlertAccumulator,
        counters: &HashMap<CounterKey, u32>,
        since: DateTime<Local>,
    ) -> (Vec<ViolationRecord>, usize) {
        let mut latest: BTreeMap<CounterKey, &ViolationRecord> = BTreeMap::new();
        for line in accumulator.pending.iter().filter(|l| l.timestamp >= since) {
            let key = (line.address.clone(), line.metric);
            match latest.get(&key) {
                Some(existing) if existing.timestamp > line.timestamp => {}
                _ => {
                    latest.insert(key, line);
                }
            }
        }

        let mut capped = 0;
        let lines = latest
            .into_iter()
            .filter(|(key, _)| {
                let over = counters.get(key).copied().unwrap_or(0) > self.config.repeat_send_cap;
                if over {
                    capped += 1;
                }
                !over
            })
            .map(|(_, line)| line.clone())
            .collect();
        (lines, capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::rules::MetricKind;
    use crate::cache::ActiveSensorInfo;
    use crate::notify::RecordingNotifier;
    use crate::packet::{FieldKey, SensorFields, SensorPacket};
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 5, 4, h, m, s).single().unwrap()
    }

    fn battery(address: &str, sequence: u64, value: f64) -> SensorPacket {
        let fields: SensorFields = [(FieldKey::Battery, value)].into_iter().collect();
        SensorPacket::new(address, sequence, Local::now(), fields).unwrap()
    }

    fn setup(admin: Vec<String>) -> (AlertDispatcher, Arc<Mutex<AlertEvaluator>>, Arc<RecordingNotifier>) {
        let alerts = Arc::new(Mutex::new(AlertEvaluator::new(2750.0)));
        let notifier = Arc::new(RecordingNotifier::new());
        let config = AlertConfig {
            admin_recipients: admin,
            ..AlertConfig::default()
        };
        let dispatcher = AlertDispatcher::new(config, alerts.clone(), notifier.clone());
        (dispatcher, alerts, notifier)
    }

    fn sensor(address: &str) -> ActiveSensorInfo {
        let mut info = ActiveSensorInfo::new(address, "expA");
        info.alert_email = "grower@example.org".to_string();
        info
    }

    #[tokio::test]
    async fn test_latest_line_per_metric_is_sent_once() {
        let (dispatcher, alerts, notifier) = setup(vec![]);
        {
            let mut alerts = alerts.lock().await;
            alerts.evaluate(&battery("fd00::1", 1, 2600.0), &sensor("fd00::1"), at(10, 4, 0));
            alerts.evaluate(&battery("fd00::1", 2, 2500.0), &sensor("fd00::1"), at(10, 5, 0));
        }

        let report = dispatcher.dispatch(at(10, 5, 30)).await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.lines, 1);
        let sent = notifier.sent().await;
        assert!(sent[0].body.contains("2500"));
        assert!(!sent[0].body.contains("2600"));
        assert_eq!(sent[0].recipients, vec!["grower@example.org"]);

        let again = dispatcher.dispatch(at(10, 5, 45)).await;
        assert_eq!(again, DispatchReport::default());
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lines_before_sub_interval_are_dropped() {
        let (dispatcher, alerts, notifier) = setup(vec![]);
        alerts
            .lock()
            .await
            .evaluate(&battery("fd00::1", 1, 2500.0), &sensor("fd00::1"), at(10, 1, 0));

        let report = dispatcher.dispatch(at(10, 16, 0)).await;
        assert_eq!(report.experiments, 1);
        assert_eq!(report.sent, 0);
        assert!(notifier.sent().await.is_empty());
        assert!(alerts.lock().await.accumulator("expA").is_none());
    }

    #[tokio::test]
    async fn test_repeat_cap_suppresses_noisy_sensor() {
        let (dispatcher, alerts, notifier) = setup(vec![]);
        {
            let mut alerts = alerts.lock().await;
            for seq in 0..7 {
                alerts.evaluate(&battery("fd00::1", seq, 2500.0), &sensor("fd00::1"), at(10, 4, 0));
            }
            assert_eq!(alerts.send_count("fd00::1", MetricKind::Battery), 7);
        }
        let report = dispatcher.dispatch(at(10, 4, 30)).await;
        assert_eq!(report.capped, 1);
        assert_eq!(report.sent, 0);
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_fallback_recipients() {
        let (dispatcher, alerts, notifier) = setup(vec!["ops@example.org".to_string()]);
        alerts.lock().await.evaluate(
            &battery("fd00::2", 1, 2500.0),
            &ActiveSensorInfo::new("fd00::2", "expA"),
            at(10, 4, 0),
        );
        dispatcher.dispatch(at(10, 4, 30)).await;
        assert_eq!(notifier.sent().await[0].recipients, vec!["ops@example.org"]);
    }
}
