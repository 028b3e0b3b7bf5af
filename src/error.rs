//! Custom error types for the gateway.
//!
//! This module defines the primary error type, `GatewayError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place to describe everything that can
//! go wrong between the serial link and the storage/notification collaborators.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a malformed TOML file or an
//!   environment override of the wrong type.
//! - **`Configuration`**: Semantic errors caught by `GatewayConfig::validate` (zero periods,
//!   impossible hours, unknown log levels).
//! - **`Io`** / **`Serial`**: Transport failures. These never stop the gateway; the reader
//!   reports them to the link health monitor and reconnects.
//! - **`InvalidPacket`**: A framed object that is valid JSON but not a sensor packet
//!   (missing address or sequence number).
//! - **`Storage`**: A time-series or document write/read failed. Logged per write; a flush
//!   cycle never rolls back its other writes.
//! - **`Notification`** / **`Http`**: A digest could not be delivered. Logged only.
//!
//! Malformed or incomplete frames are not represented here: the frame assembler recovers
//! from them by accumulating more input and never surfaces them.

use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    #[error("Serial link closed by the device")]
    SerialUnexpectedEof,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid sensor packet: {0}")]
    InvalidPacket(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<figment::Error> for GatewayError {
    fn from(value: figment::Error) -> Self {
        GatewayError::Config(Box::new(value))
    }
}

impl GatewayError {
    /// Whether the error came from the physical link rather than from data or collaborators.
    ///
    /// Transport errors feed the link health state machine.
    pub fn is_transport(&self) -> bool {
        match self {
            GatewayError::Io(_) | GatewayError::SerialUnexpectedEof => true,
            #[cfg(feature = "serial")]
            GatewayError::Serial(_) => true,
            _ => false,
        }
    }
}
