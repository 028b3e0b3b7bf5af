//! Buffer flush to the stores.
//!
//! Every cycle drains the whole [`SensorStateTable`] and writes one point plus two
//! documents per resolvable address. Delivery is at-most-once: the buffer is cleared
//! whether or not the writes succeed, and readings of unresolved addresses are dropped.

use crate::cache::{ActiveSensorCache, ActiveSensorInfo};
use crate::config::SyncConfig;
use crate::dedup::{SensorState, SensorStateTable};
use crate::packet::fields_to_json;
use crate::scheduler::spawn_aligned;
use crate::storage::{DocumentStore, TimeSeriesPoint, TimeSeriesStore};
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Addresses written (at least one store accepted them)
    pub flushed: usize,
    /// Addresses discarded because they resolved to no active sensor
    pub skipped: usize,
    /// Individual store writes that failed
    pub failed_writes: usize,
    /// Counter value tagged onto this cycle's points
    pub flush_counter: u64,
}

/// Periodic flush of buffered sensor state.
pub struct SyncScheduler {
    config: SyncConfig,
    states: Arc<Mutex<SensorStateTable>>,
    cache: Arc<ActiveSensorCache>,
    time_series: Arc<dyn TimeSeriesStore>,
    documents: Arc<dyn DocumentStore>,
    flush_counter: AtomicU64,
    armed: AtomicBool,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.config)
            .field("flush_counter", &self.flush_counter)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl SyncScheduler {
    /// Scheduler flushing `states` into the given stores.
    pub fn new(
        config: SyncConfig,
        states: Arc<Mutex<SensorStateTable>>,
        cache: Arc<ActiveSensorCache>,
        time_series: Arc<dyn TimeSeriesStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config,
            states,
            cache,
            time_series,
            documents,
            flush_counter: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Start the aligned flush schedule. Only the first call has an effect.
    pub fn arm(self: &Arc<Self>) -> bool {
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(period = ?self.config.period, "Uploads armed");
        let this = Arc::clone(self);
        let handle = spawn_aligned("sync", self.config.period, move |now| {
            let this = Arc::clone(&this);
            async move {
                this.run_cycle(now).await;
                Ok(())
            }
        });
        match self.task.lock() {
            Ok(mut task) => *task = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        true
    }

    /// Abort the flush schedule started by [`arm`](Self::arm), if any.
    ///
    /// Buffered state is left in place; the scheduler stays armed, so a later `arm` does
    /// not restart it.
    pub fn stop(&self) -> bool {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!("Sync schedule stopped");
                true
            }
            None => false,
        }
    }

    /// Whether [`arm`](Self::arm) has been called.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Number of cycles run so far.
    pub fn flush_counter(&self) -> u64 {
        self.flush_counter.load(Ordering::SeqCst)
    }

    /// Drain the buffer and write every resolvable address.
    pub async fn run_cycle(&self, now: DateTime<Local>) -> SyncReport {
        let drained = self.states.lock().await.drain();
        let flush_counter = self.flush_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = SyncReport {
            flush_counter,
            ..Default::default()
        };

        for (address, state) in drained {
            let Some(info) = self.cache.resolve(&address).await else {
                tracing::warn!(%address, "Discarding buffered reading of unresolved sensor");
                report.skipped += 1;
                continue;
            };
            let failures = self.write(&info, &state, now, flush_counter).await;
            report.failed_writes += failures;
            if failures < 3 {
                report.flushed += 1;
            }
        }

        tracing::info!(
            flushed = report.flushed,
            skipped = report.skipped,
            failed_writes = report.failed_writes,
            flush_counter,
            "Sync cycle complete"
        );
        report
    }

    async fn write(
        &self,
        info: &ActiveSensorInfo,
        state: &SensorState,
        now: DateTime<Local>,
        flush_counter: u64,
    ) -> usize {
        let mut failures = 0;

        let point = TimeSeriesPoint {
            experiment: info.collection_name.clone(),
            address: info.address.clone(),
            location: info.location.clone(),
            flush_counter,
            timestamp: now,
            fields: state.merged_fields.clone(),
        };
        if let Err(e) = self.time_series.insert_point(&point).await {
            tracing::error!(address = %info.address, error = %e, "Time-series write failed");
            failures += 1;
        }

        let document = build_document(info, state, now);
        let experiment_collection = experiment_collection(&info.collection_name);
        for collection in [experiment_collection.as_str(), self.config.aggregate_collection.as_str()] {
            if let Err(e) = self
                .documents
                .upsert(collection, &info.address, document.clone())
                .await
            {
                tracing::error!(address = %info.address, collection, error = %e, "Document write failed");
                failures += 1;
            }
        }
        failures
    }
}

/// Collection holding the documents of one experiment.
pub fn experiment_collection(collection_name: &str) -> String {
    format!("{collection_name}_DATA")
}

/// Document written for one flushed address.
pub fn build_document(info: &ActiveSensorInfo, state: &SensorState, now: DateTime<Local>) -> Value {
    json!({
        "TimeStamp": now.to_rfc3339(),
        "UniqueID": uuid::Uuid::new_v4().to_string(),
        "MetaData": {
            "LLA": info.address,
            "ExperimentName": info.collection_name,
            "Location": info.location,
        },
        "SensorData": fields_to_json(&state.merged_fields),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FieldKey, SensorFields, SensorPacket};
    use crate::storage::MemoryStore;
    use tracing_test::traced_test;

    fn config() -> SyncConfig {
        SyncConfig {
            period: std::time::Duration::from_secs(180),
            aggregate_collection: "sensors_aggregate".to_string(),
        }
    }

    fn packet(address: &str, sequence: u64, temperature: f64) -> SensorPacket {
        let mut fields = SensorFields::new();
        fields.insert(FieldKey::Temperature, temperature);
        SensorPacket::new(address, sequence, Local::now(), fields).unwrap()
    }

    async fn setup() -> (Arc<SyncScheduler>, Arc<MemoryStore>, Arc<Mutex<SensorStateTable>>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ActiveSensorCache::new());
        let mut info = ActiveSensorInfo::new("fd00::1", "expA");
        info.location = "north bench".to_string();
        cache.replace(vec![info]).await;
        let states = Arc::new(Mutex::new(SensorStateTable::new()));
        let sync = Arc::new(SyncScheduler::new(
            config(),
            states.clone(),
            cache,
            store.clone(),
            store.clone(),
        ));
        (sync, store, states)
    }

    #[tokio::test]
    async fn test_cycle_writes_point_and_both_documents() {
        let (sync, store, states) = setup().await;
        states.lock().await.observe(&packet("fd00::1", 1, 22.5));

        let report = sync.run_cycle(Local::now()).await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.flush_counter, 1);

        let points = store.points().await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].experiment, "expA");
        assert_eq!(points[0].location, "north bench");

        let doc = store.document("expA_DATA", "fd00::1").await.unwrap();
        assert_eq!(doc["MetaData"]["LLA"], "fd00::1");
        assert_eq!(doc["SensorData"]["temperature"], 22.5);
        assert!(store.document("sensors_aggregate", "fd00::1").await.is_some());
        assert!(states.lock().await.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unresolved_address_is_skipped_and_cleared() {
        let (sync, store, states) = setup().await;
        states.lock().await.observe(&packet("fd00::77", 4, 19.0));

        let report = sync.run_cycle(Local::now()).await;
        assert_eq!(report.flushed, 0);
        assert_eq!(report.skipped, 1);
        assert!(store.points().await.is_empty());
        assert!(states.lock().await.is_empty());
        assert!(logs_contain("Discarding buffered reading of unresolved sensor"));
    }

    #[tokio::test]
    async fn test_time_series_failure_does_not_block_documents() {
        let (sync, store, states) = setup().await;
        store.fail_points(true);
        states.lock().await.observe(&packet("fd00::1", 1, 22.5));

        let report = sync.run_cycle(Local::now()).await;
        assert_eq!(report.failed_writes, 1);
        assert_eq!(report.flushed, 1);
        assert!(store.document("expA_DATA", "fd00::1").await.is_some());
        assert!(states.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_cycle_still_clears_buffer() {
        let (sync, store, states) = setup().await;
        store.fail_points(true);
        store.fail_documents(true);
        states.lock().await.observe(&packet("fd00::1", 1, 22.5));

        let report = sync.run_cycle(Local::now()).await;
        assert_eq!(report.failed_writes, 3);
        assert_eq!(report.flushed, 0);
        assert!(states.lock().await.is_empty());

        let second = sync.run_cycle(Local::now()).await;
        assert_eq!(second.flush_counter, 2);
        assert_eq!(second.flushed + second.skipped, 0);
    }

    #[tokio::test]
    async fn test_arm_is_idempotent() {
        let (sync, _store, _states) = setup().await;
        assert!(sync.arm());
        assert!(!sync.arm());
        assert!(sync.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_flush_schedule() {
        let (sync, _store, _states) = setup().await;
        assert!(!sync.stop());
        assert!(sync.arm());

        tokio::time::sleep(std::time::Duration::from_secs(181)).await;
        let flushed = sync.flush_counter();
        assert!(flushed >= 1);

        assert!(sync.stop());
        assert!(!sync.stop());
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert_eq!(sync.flush_counter(), flushed);
        assert!(!sync.arm());
    }
}
