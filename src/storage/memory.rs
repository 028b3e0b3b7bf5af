//! In-memory storage backend.

use super::{DocumentStore, SensorDirectory, TimeSeriesPoint, TimeSeriesStore};
use crate::cache::ActiveSensorInfo;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Keeps points, documents and the sensor directory in memory.
///
/// Upserting a document with a `TimeStamp` also moves the matching directory entry's
/// `last_reading_at`, the way the hosted directory tracks last-seen times.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sensors: RwLock<Vec<ActiveSensorInfo>>,
    documents: RwLock<HashMap<String, HashMap<String, Value>>>,
    points: RwLock<Vec<TimeSeriesPoint>>,
    fail_points: AtomicBool,
    fail_documents: AtomicBool,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose directory lists `sensors`.
    pub fn with_sensors(sensors: Vec<ActiveSensorInfo>) -> Self {
        Self {
            sensors: RwLock::new(sensors),
            ..Default::default()
        }
    }

    /// Store whose directory is read from a JSON array file.
    pub async fn from_sensors_file(path: &Path) -> GatewayResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let sensors: Vec<ActiveSensorInfo> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), sensors = sensors.len(), "Loaded sensor directory");
        Ok(Self::with_sensors(sensors))
    }

    /// Replace the directory.
    pub async fn set_sensors(&self, sensors: Vec<ActiveSensorInfo>) {
        *self.sensors.write().await = sensors;
    }

    /// Make subsequent point inserts fail.
    pub fn fail_points(&self, fail: bool) {
        self.fail_points.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent document upserts fail.
    pub fn fail_documents(&self, fail: bool) {
        self.fail_documents.store(fail, Ordering::SeqCst);
    }

    /// Every point inserted so far.
    pub async fn points(&self) -> Vec<TimeSeriesPoint> {
        self.points.read().await.clone()
    }

    /// Current document of `address` in `collection`.
    pub async fn document(&self, collection: &str, address: &str) -> Option<Value> {
        self.documents
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(address))
            .cloned()
    }

    /// Number of documents in `collection`.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.documents
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

fn document_timestamp(document: &Value) -> Option<DateTime<Local>> {
    document
        .get("TimeStamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Local))
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn insert_point(&self, point: &TimeSeriesPoint) -> GatewayResult<()> {
        if self.fail_points.load(Ordering::SeqCst) {
            return Err(GatewayError::Storage("time-series store unavailable".into()));
        }
        self.points.write().await.push(point.clone());
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, address: &str, document: Value) -> GatewayResult<()> {
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(GatewayError::Storage(format!(
                "document store rejected write to {collection}"
            )));
        }
        if let Some(at) = document_timestamp(&document) {
            for sensor in self
                .sensors
                .write()
                .await
                .iter_mut()
                .filter(|s| s.address == address)
            {
                sensor.last_reading_at = Some(at);
            }
        }
        self.documents
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(address.to_string(), document);
        Ok(())
    }
}

#[async_trait]
impl SensorDirectory for MemoryStore {
    async fn active_sensors(&self) -> GatewayResult<Vec<ActiveSensorInfo>> {
        Ok(self.sensors.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_upsert_replaces_and_tracks_last_reading() {
        let store = MemoryStore::with_sensors(vec![ActiveSensorInfo::new("fd00::1", "expA")]);
        store
            .upsert("expA_DATA", "fd00::1", json!({"TimeStamp": "2026-05-01T10:00:00+00:00", "v": 1}))
            .await
            .unwrap();
        store
            .upsert("expA_DATA", "fd00::1", json!({"TimeStamp": "2026-05-01T10:03:00+00:00", "v": 2}))
            .await
            .unwrap();

        assert_eq!(store.collection_len("expA_DATA").await, 1);
        assert_eq!(store.document("expA_DATA", "fd00::1").await.unwrap()["v"], json!(2));

        let sensors = store.active_sensors().await.unwrap();
        let expected = DateTime::parse_from_rfc3339("2026-05-01T10:03:00+00:00").unwrap();
        assert_eq!(sensors[0].last_reading_at.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_documents(true);
        assert!(store.upsert("c", "a", json!({})).await.is_err());
        store.fail_documents(false);
        assert!(store.upsert("c", "a", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_from_sensors_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"address": "fd00::1", "collection_name": "expA", "location": "bench 3"}}]"#
        )
        .unwrap();
        let store = MemoryStore::from_sensors_file(file.path()).await.unwrap();
        let sensors = store.active_sensors().await.unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].location, "bench 3");
    }
}
