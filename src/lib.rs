//! # Field Gateway Core Library
//!
//! Data-acquisition and alerting core of a greenhouse sensor gateway. Battery-powered
//! sensors report over a wireless mesh to a radio coordinator on a serial port; this crate
//! turns that byte stream into buffered, deduplicated readings, flushes them on a
//! wall-clock cadence, and mails digests when readings leave their allowed range.
//!
//! ## Crate Structure
//!
//! - **`framing`**: Reassembles JSON objects from arbitrarily split serial chunks and spots
//!   heartbeat lines.
//! - **`packet`**: `SensorPacket` and the closed set of numeric fields a sensor can report.
//! - **`dedup`**: Per-address merge of partial readings; repeated sequence numbers are ignored.
//! - **`gate`**: Reference-counted advisory gate that pauses ingestion during bulk operations.
//! - **`cache`**: Periodically rebuilt map from address to experiment, rules and recipients.
//! - **`scheduler`**: Wall-clock aligned and plain periodic jobs.
//! - **`sync`**: Buffer flush into the time-series and document stores.
//! - **`alerts`**: Threshold rules, per-reading evaluation and rate-limited digest dispatch.
//! - **`monitor`**: Daily silent-sensor scan and serial link health.
//! - **`fanout`**: Live JSON-lines feed of readings and heartbeats.
//! - **`storage`** / **`notify`**: Collaborator traits with in-memory, file and HTTP backends.
//! - **`transport`**: Serial port reader.
//! - **`context`** / **`gateway`**: Shared state and the ingestion loop that ties it together.
//! - **`config`**, **`error`**, **`logging`**: Ambient configuration, errors and tracing.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod fanout;
pub mod framing;
pub mod gate;
pub mod gateway;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod packet;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::GatewayConfig;
pub use context::{GatewayContext, Stores};
pub use error::{GatewayError, GatewayResult};
