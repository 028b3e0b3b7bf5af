//! Storage collaborators.
//!
//! The gateway treats its stores as opaque services with three operations:
//!
//! - [`TimeSeriesStore::insert_point`]: append one point tagged by experiment
//! - [`DocumentStore::upsert`]: replace the document of one address in a collection
//! - [`SensorDirectory::active_sensors`]: bulk read of the active sensor directory
//!
//! [`MemoryStore`] implements all three and is what tests and stand-alone deployments
//! use; [`JsonLinesTimeSeries`] appends points to per-experiment files.

mod jsonl;
mod memory;

pub use jsonl::JsonLinesTimeSeries;
pub use memory::MemoryStore;

use crate::cache::ActiveSensorInfo;
use crate::error::GatewayResult;
use crate::packet::SensorFields;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;

/// One flushed reading as written to the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    /// Experiment tag
    pub experiment: String,
    /// Sensor address tag
    pub address: String,
    /// Location tag
    pub location: String,
    /// Flush cycle that produced the point
    pub flush_counter: u64,
    /// Time of the flush
    pub timestamp: DateTime<Local>,
    /// Merged fields
    pub fields: SensorFields,
}

/// Append-only time-series sink.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Insert one point.
    async fn insert_point(&self, point: &TimeSeriesPoint) -> GatewayResult<()>;
}

/// Document store keyed by address within a collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document for `address` in `collection`.
    async fn upsert(&self, collection: &str, address: &str, document: Value) -> GatewayResult<()>;
}

/// Source of the active sensor directory.
#[async_trait]
pub trait SensorDirectory: Send + Sync {
    /// Every sensor of every running experiment.
    async fn active_sensors(&self) -> GatewayResult<Vec<ActiveSensorInfo>>;
}
