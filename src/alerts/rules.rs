//! Threshold rules with a daily active window.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    /// Air temperature against the sensor's temperature rule
    Temperature,
    /// Battery against the global minimum
    Battery,
    /// Light intensity against the sensor's light rule
    Light,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Temperature => "Temperature",
            MetricKind::Battery => "Battery",
            MetricKind::Light => "Light",
        })
    }
}

/// `[min, max]` band that is only enforced inside `[window_start, window_end)`.
///
/// A window whose bounds are both midnight is the "not configured" sentinel and never
/// fires. A window whose end precedes its start spans midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Lowest acceptable value
    pub min: f64,
    /// Highest acceptable value
    pub max: f64,
    /// Local time the rule starts applying
    #[serde(default)]
    pub window_start: NaiveTime,
    /// Local time the rule stops applying
    #[serde(default)]
    pub window_end: NaiveTime,
}

impl AlertRule {
    /// Rule enforcing `[min, max]` between `window_start` and `window_end`.
    pub fn new(min: f64, max: f64, window_start: NaiveTime, window_end: NaiveTime) -> Self {
        Self {
            min,
            max,
            window_start,
            window_end,
        }
    }

    /// Whether both window bounds are the midnight sentinel.
    pub fn is_disabled(&self) -> bool {
        let sentinel = NaiveTime::default();
        self.window_start == sentinel && self.window_end == sentinel
    }

    /// Whether `time` falls inside the active window.
    pub fn is_active_at(&self, time: NaiveTime) -> bool {
        if self.is_disabled() {
            return false;
        }
        if self.window_start <= self.window_end {
            self.window_start <= time && time < self.window_end
        } else {
            time >= self.window_start || time < self.window_end
        }
    }

    /// Whether `value` lies outside `[min, max]`.
    pub fn is_out_of_range(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }

    /// Whether `value` observed at `time` is a violation.
    pub fn is_violated(&self, value: f64, time: NaiveTime) -> bool {
        self.is_out_of_range(value) && self.is_active_at(time)
    }

    /// Human-readable band, e.g. `18 - 30`.
    pub fn range_label(&self) -> String {
        format!("{} - {}", self.min, self.max)
    }
}
