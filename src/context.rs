//! Shared gateway state.
//!
//! Every component receives the [`GatewayContext`] (or the pieces of it it needs) instead
//! of reaching for globals. Ownership of each mutable field:
//!
//! | field | written by | read by |
//! |-------|------------|---------|
//! | `gate` | bulk operations, cache refresh (via guards) | ingestion |
//! | `cache` | cache refresh, dead-man scan | ingestion, sync, dead-man |
//! | `states` | ingestion (merge), sync (drain) | |
//! | `alerts` | ingestion (evaluate), dispatcher (drain) | |
//! | `link` | link checks, serial reader | |
//!
//! Locks are taken for the duration of an in-memory update only and are never held across
//! a storage or notification call.

use crate::alerts::{AlertDispatcher, AlertEvaluator};
use crate::cache::{ActiveSensorCache, ActiveSensorInfo};
use crate::config::GatewayConfig;
use crate::dedup::SensorStateTable;
use crate::error::GatewayResult;
use crate::fanout::Fanout;
use crate::gate::{Guarded, IngestionGate};
use crate::monitor::{DeadManMonitor, LinkHealthMonitor};
use crate::notify::{self, Notifier};
use crate::storage::{
    DocumentStore, JsonLinesTimeSeries, MemoryStore, SensorDirectory, TimeSeriesStore,
};
use crate::sync::SyncScheduler;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage collaborators of one gateway.
#[derive(Clone)]
pub struct Stores {
    /// Time-series sink
    pub time_series: Arc<dyn TimeSeriesStore>,
    /// Document store
    pub documents: Arc<dyn DocumentStore>,
    /// Active sensor directory
    pub directory: Arc<dyn SensorDirectory>,
}

impl Stores {
    /// All three roles served by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            time_series: store.clone(),
            documents: store.clone(),
            directory: store,
        }
    }

    /// Stores described by the `storage` section.
    pub async fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let store = match &config.storage.sensors_file {
            Some(path) => Arc::new(MemoryStore::from_sensors_file(path).await?),
            None => {
                tracing::warn!("No sensors file configured; the sensor directory starts empty");
                Arc::new(MemoryStore::new())
            }
        };
        let mut stores = Self::memory(store);
        if let Some(dir) = &config.storage.output_dir {
            stores.time_series = Arc::new(JsonLinesTimeSeries::create(dir.clone()).await?);
        }
        Ok(stores)
    }
}

/// Owned shared state of a running gateway.
pub struct GatewayContext {
    /// Effective configuration
    pub config: Arc<GatewayConfig>,
    /// Advisory ingestion gate
    pub gate: IngestionGate,
    /// Address to experiment resolution
    pub cache: Arc<ActiveSensorCache>,
    /// Buffered sensor states
    pub states: Arc<Mutex<SensorStateTable>>,
    /// Alert accumulators and send counters
    pub alerts: Arc<Mutex<AlertEvaluator>>,
    /// Serial link state machine
    pub link: Mutex<LinkHealthMonitor>,
    /// Live subscriber hub
    pub fanout: Fanout,
    /// Storage collaborators
    pub stores: Stores,
    /// Notification collaborator
    pub notifier: Arc<dyn Notifier>,
    /// Buffer flush
    pub sync: Arc<SyncScheduler>,
    /// Alert digest delivery
    pub dispatcher: AlertDispatcher,
    /// Silent sensor scan
    pub dead_man: DeadManMonitor,
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("gate", &self.gate)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl GatewayContext {
    /// Wire every component around the given collaborators.
    pub fn new(config: GatewayConfig, stores: Stores, notifier: Arc<dyn Notifier>) -> Self {
        let config = Arc::new(config);
        let gate = IngestionGate::new();
        let cache = Arc::new(ActiveSensorCache::new());
        let states = Arc::new(Mutex::new(SensorStateTable::new()));
        let alerts = Arc::new(Mutex::new(AlertEvaluator::new(config.alerts.battery_min)));

        let sync = Arc::new(SyncScheduler::new(
            config.sync.clone(),
            states.clone(),
            cache.clone(),
            stores.time_series.clone(),
            stores.documents.clone(),
        ));
        let dispatcher = AlertDispatcher::new(config.alerts.clone(), alerts.clone(), notifier.clone());
        let dead_man = DeadManMonitor::new(
            config.dead_man.clone(),
            config.alerts.admin_recipients.clone(),
            cache.clone(),
            stores.directory.clone(),
            gate.clone(),
            notifier.clone(),
        );

        Self {
            link: Mutex::new(LinkHealthMonitor::new(&config.link_health)),
            fanout: Fanout::new(config.fanout.capacity),
            config,
            gate,
            cache,
            states,
            alerts,
            stores,
            notifier,
            sync,
            dispatcher,
            dead_man,
        }
    }

    /// Context built from configuration alone.
    pub async fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let stores = Stores::from_config(&config).await?;
        let notifier = notify::from_config(&config.notify)?;
        Ok(Self::new(config, stores, notifier))
    }

    /// Rebuild the cache; arms uploads once any sensor is active.
    pub async fn refresh_cache(&self) -> GatewayResult<usize> {
        let count = self
            .cache
            .refresh(self.stores.directory.as_ref(), &self.gate)
            .await?;
        if count > 0 {
            self.sync.arm();
        }
        Ok(count)
    }

    /// Bulk read of the sensor directory. Ingestion stays paused until the result is dropped.
    pub async fn bulk_read_directory(&self) -> GatewayResult<Guarded<Vec<ActiveSensorInfo>>> {
        let guard = self.gate.acquire();
        let sensors = self.stores.directory.active_sensors().await?;
        Ok(Guarded::new(sensors, guard))
    }

    /// Bulk upsert into `collection` with ingestion paused. Returns the number written.
    pub async fn bulk_upsert(
        &self,
        collection: &str,
        documents: Vec<(String, Value)>,
    ) -> GatewayResult<usize> {
        let _guard = self.gate.acquire();
        let mut written = 0;
        for (address, document) in documents {
            self.stores.documents.upsert(collection, &address, document).await?;
            written += 1;
        }
        tracing::info!(collection, written, "Bulk upsert complete");
        Ok(written)
    }

    /// Send `body` to the configured administrators, logging failures.
    pub async fn notify_admins(&self, subject: &str, body: &str) {
        let recipients = &self.config.alerts.admin_recipients;
        if recipients.is_empty() {
            tracing::warn!(subject, "No admin recipients configured");
            return;
        }
        if let Err(e) = self.notifier.send(recipients, subject, body).await {
            tracing::error!(subject, error = %e, "Admin notification failed");
        }
    }
}
