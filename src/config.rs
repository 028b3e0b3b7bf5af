//! Gateway configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults (every field has one, so an empty file is valid)
//! 2. a TOML file (`config/gateway.toml` unless another path is given)
//! 3. environment variables prefixed with `FIELD_GATEWAY_`, using `__` between
//!    section and key (e.g. `FIELD_GATEWAY_ALERTS__BATTERY_MIN=2800`)
//!
//! Durations are written in humantime notation (`"3m"`, `"90s"`, `"16m"`).
//!
//! # Example
//! ```no_run
//! use field_gateway::config::GatewayConfig;
//!
//! let config = GatewayConfig::load()?;
//! config.validate()?;
//! println!("Serial device: {}", config.serial.device.display());
//! # Ok::<(), field_gateway::error::GatewayError>(())
//! ```

use crate::error::{GatewayError, GatewayResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Serial link to the radio coordinator
    pub serial: SerialConfig,
    /// Buffer flush cadence
    pub sync: SyncConfig,
    /// Threshold alerting and digest delivery
    pub alerts: AlertConfig,
    /// Daily silent-sensor scan
    pub dead_man: DeadManConfig,
    /// Physical link supervision
    pub link_health: LinkHealthConfig,
    /// Active sensor cache
    pub cache: CacheConfig,
    /// Live subscriber broadcast
    pub fanout: FanoutConfig,
    /// Storage collaborators
    pub storage: StorageConfig,
    /// Notification collaborator
    pub notify: NotifyConfig,
}

/// Serial transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device node of the radio coordinator
    pub device: PathBuf,
    /// Baud rate
    pub baud_rate: u32,
    /// Substring identifying heartbeat lines
    pub heartbeat_marker: String,
    /// Delay before reopening the port after a transport failure
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Size of a single read from the port
    pub read_buffer: usize,
}

/// Sync scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Flush period; flushes fire on wall-clock multiples of it
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Document collection receiving every experiment's readings
    pub aggregate_collection: String,
}

/// Alert evaluation and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Global minimum battery reading; anything below violates
    pub battery_min: f64,
    /// Digest dispatch cadence
    #[serde(with = "humantime_serde")]
    pub dispatch_every: Duration,
    /// Width of the sub-interval whose latest violations make it into a digest
    #[serde(with = "humantime_serde")]
    pub sub_interval: Duration,
    /// Violations of one sensor+metric are no longer mailed once its counter exceeds this
    pub repeat_send_cap: u32,
    /// Recipients of link alerts and fallback for experiments without an address
    pub admin_recipients: Vec<String>,
}

/// Dead-man scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadManConfig {
    /// Local hour (0-23) at which the daily scan runs
    pub scan_hour: u32,
    /// Silence after which a sensor is reported
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

/// Link health settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkHealthConfig {
    /// Presence check period
    #[serde(with = "humantime_serde")]
    pub check_every: Duration,
    /// Minimum time between two link alerts
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Number of follow-up alerts while the link stays down
    pub escalation_cap: u32,
}

/// Active sensor cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Rebuild period
    #[serde(with = "humantime_serde")]
    pub refresh_every: Duration,
}

/// Fanout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Address for line-delimited JSON subscribers; disabled when unset
    pub listen: Option<SocketAddr>,
    /// Broadcast channel capacity
    pub capacity: usize,
}

/// Storage collaborator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file listing the active sensors
    pub sensors_file: Option<PathBuf>,
    /// Directory for JSON-lines time-series output; in-memory when unset
    pub output_dir: Option<PathBuf>,
}

/// Notification collaborator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// HTTP mail relay; notifications are only logged when unset
    pub webhook_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            serial: SerialConfig::default(),
            sync: SyncConfig::default(),
            alerts: AlertConfig::default(),
            dead_man: DeadManConfig::default(),
            link_health: LinkHealthConfig::default(),
            cache: CacheConfig::default(),
            fanout: FanoutConfig::default(),
            storage: StorageConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            baud_rate: 115_200,
            heartbeat_marker: "heartbeat".to_string(),
            reconnect_delay: Duration::from_secs(5),
            read_buffer: 1024,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3 * 60),
            aggregate_collection: "sensors_aggregate".to_string(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            battery_min: 2750.0,
            dispatch_every: Duration::from_secs(16 * 60),
            sub_interval: Duration::from_secs(3 * 60),
            repeat_send_cap: 6,
            admin_recipients: Vec::new(),
        }
    }
}

impl Default for DeadManConfig {
    fn default() -> Self {
        Self {
            scan_hour: 8,
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for LinkHealthConfig {
    fn default() -> Self {
        Self {
            check_every: Duration::from_secs(60),
            cooldown: Duration::from_secs(10 * 60),
            escalation_cap: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_every: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            listen: None,
            capacity: 256,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `config/gateway.toml` and environment variables
    pub fn load() -> GatewayResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        Ok(Self::figment(Toml::file(path.as_ref())).extract()?)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(toml: &str) -> GatewayResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(file)
            .merge(Env::prefixed("FIELD_GATEWAY_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> GatewayResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        let periods = [
            ("sync.period", self.sync.period),
            ("alerts.dispatch_every", self.alerts.dispatch_every),
            ("alerts.sub_interval", self.alerts.sub_interval),
            ("link_health.check_every", self.link_health.check_every),
            ("cache.refresh_every", self.cache.refresh_every),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(GatewayError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.alerts.sub_interval > self.alerts.dispatch_every {
            return Err(GatewayError::Configuration(format!(
                "alerts.sub_interval ({:?}) exceeds alerts.dispatch_every ({:?})",
                self.alerts.sub_interval, self.alerts.dispatch_every
            )));
        }

        if self.dead_man.scan_hour > 23 {
            return Err(GatewayError::Configuration(format!(
                "Invalid dead_man.scan_hour {}. Must be 0-23",
                self.dead_man.scan_hour
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.fanout.capacity == 0 {
            return Err(GatewayError::Configuration(
                "fanout.capacity must be at least 1".to_string(),
            ));
        }

        if self.serial.read_buffer == 0 {
            return Err(GatewayError::Configuration(
                "serial.read_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
