//! Active sensor cache.
//!
//! Read-through view of "which experiment owns this address, who gets its alerts and what
//! are its rules". It is rebuilt wholesale from the sensor directory on a fixed cadence
//! and is allowed to be stale in between. Single writer (the refresh), many readers.
//!
//! An address listed by more than one active entry is ambiguous: it resolves to nothing
//! until the directory is fixed, so its readings are neither synced nor alerted on.

use crate::alerts::rules::AlertRule;
use crate::error::GatewayResult;
use crate::gate::IngestionGate;
use crate::storage::SensorDirectory;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Directory entry for one active sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSensorInfo {
    /// Sensor address
    pub address: String,
    /// Experiment (and storage collection) owning the sensor
    pub collection_name: String,
    /// Comma-separated alert recipients
    #[serde(default)]
    pub alert_email: String,
    /// Free-text location label
    #[serde(default)]
    pub location: String,
    /// Temperature rule, if configured
    #[serde(default)]
    pub temperature_rule: Option<AlertRule>,
    /// Light rule, if configured
    #[serde(default)]
    pub light_rule: Option<AlertRule>,
    /// Whether threshold alerts are wanted for this sensor
    #[serde(default = "default_alerts_enabled")]
    pub alerts_enabled: bool,
    /// Sensors flagged faulty are left out of the dead-man scan
    #[serde(default)]
    pub faulty: bool,
    /// Time of the last stored reading
    #[serde(default)]
    pub last_reading_at: Option<DateTime<Local>>,
}

fn default_alerts_enabled() -> bool {
    true
}

impl ActiveSensorInfo {
    /// Minimal entry owned by `collection_name`.
    pub fn new(address: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            collection_name: collection_name.into(),
            alert_email: String::new(),
            location: String::new(),
            temperature_rule: None,
            light_rule: None,
            alerts_enabled: true,
            faulty: false,
            last_reading_at: None,
        }
    }

    /// An entry is usable only when it names its experiment.
    pub fn is_valid(&self) -> bool {
        !self.address.trim().is_empty() && !self.collection_name.trim().is_empty()
    }

    /// Alert recipients parsed from `alert_email`.
    pub fn recipients(&self) -> Vec<String> {
        self.alert_email
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: HashMap<String, ActiveSensorInfo>,
    ambiguous: HashSet<String>,
    refreshed_at: Option<DateTime<Local>>,
}

impl Snapshot {
    fn build(records: Vec<ActiveSensorInfo>, now: DateTime<Local>) -> Self {
        let mut entries: HashMap<String, ActiveSensorInfo> = HashMap::new();
        let mut ambiguous: HashSet<String> = HashSet::new();
        for record in records {
            if !record.is_valid() {
                tracing::debug!(address = %record.address, "Skipping directory entry without experiment");
                continue;
            }
            if ambiguous.contains(&record.address) {
                continue;
            }
            if let Some(previous) = entries.remove(&record.address) {
                tracing::warn!(
                    address = %record.address,
                    first = %previous.collection_name,
                    second = %record.collection_name,
                    "Sensor listed by two active experiments; ignoring it"
                );
                ambiguous.insert(record.address);
                continue;
            }
            entries.insert(record.address.clone(), record);
        }
        Self {
            entries,
            ambiguous,
            refreshed_at: Some(now),
        }
    }
}

/// Shared, periodically rebuilt map of address to [`ActiveSensorInfo`].
#[derive(Debug, Default)]
pub struct ActiveSensorCache {
    inner: RwLock<Snapshot>,
}

impl ActiveSensorCache {
    /// Empty cache; every address is unresolved until the first refresh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the directory.
    ///
    /// The bulk read runs with the ingestion gate closed. On failure the previous snapshot
    /// stays in place. Returns the number of resolvable sensors.
    pub async fn refresh(
        &self,
        directory: &dyn SensorDirectory,
        gate: &IngestionGate,
    ) -> GatewayResult<usize> {
        let records = {
            let _guard = gate.acquire();
            directory.active_sensors().await?
        };
        Ok(self.replace(records).await)
    }

    /// Replace the snapshot with `records`.
    pub async fn replace(&self, records: Vec<ActiveSensorInfo>) -> usize {
        let snapshot = Snapshot::build(records, Local::now());
        let count = snapshot.entries.len();
        *self.inner.write().await = snapshot;
        tracing::debug!(sensors = count, "Active sensor cache rebuilt");
        count
    }

    /// Entry owning `address`, if exactly one valid entry does.
    pub async fn resolve(&self, address: &str) -> Option<ActiveSensorInfo> {
        self.inner.read().await.entries.get(address).cloned()
    }

    /// Entry for `address` if it should be evaluated for threshold alerts.
    pub async fn for_alerting(&self, address: &str) -> Option<ActiveSensorInfo> {
        self.resolve(address)
            .await
            .filter(|info| info.alerts_enabled)
    }

    /// Every resolvable entry.
    pub async fn entries(&self) -> Vec<ActiveSensorInfo> {
        self.inner.read().await.entries.values().cloned().collect()
    }

    /// Whether `address` was dropped for being listed twice.
    pub async fn is_ambiguous(&self, address: &str) -> bool {
        self.inner.read().await.ambiguous.contains(address)
    }

    /// Number of resolvable entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether no entry resolves.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Time of the last successful rebuild.
    pub async fn refreshed_at(&self) -> Option<DateTime<Local>> {
        self.inner.read().await.refreshed_at
    }
}
