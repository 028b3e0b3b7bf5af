//! Per-reading threshold evaluation.
//!
//! Violations are not sent immediately. They are appended to a per-experiment
//! accumulator that the dispatcher drains on its own cadence, and every violation bumps
//! a send counter for its `(address, metric)` pair so a sensor that stays out of range
//! eventually stops being reported.

use super::rules::{AlertRule, MetricKind};
use crate::cache::ActiveSensorInfo;
use crate::packet::{FieldKey, SensorPacket};
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// One out-of-range observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    /// When the reading was evaluated
    pub timestamp: DateTime<Local>,
    /// Experiment owning the sensor
    pub experiment: String,
    /// Sensor location label
    pub location: String,
    /// Sensor address
    pub address: String,
    /// Metric that was out of range
    pub metric: MetricKind,
    /// Observed value
    pub observed: f64,
    /// Acceptable range, as shown to recipients
    pub range: String,
}

/// Pending violations of one experiment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentAlertAccumulator {
    /// Violations recorded since the last dispatch
    pub pending: Vec<ViolationRecord>,
    /// Recipients taken from the most recent violating sensor
    pub recipients: Vec<String>,
}

/// Key of a send counter.
pub type CounterKey = (String, MetricKind);

/// Accumulators and send counters for every experiment.
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    battery_min: f64,
    accumulators: HashMap<String, ExperimentAlertAccumulator>,
    send_counters: HashMap<CounterKey, u32>,
}

impl AlertEvaluator {
    /// Evaluator flagging batteries below `battery_min`.
    pub fn new(battery_min: f64) -> Self {
        Self {
            battery_min,
            accumulators: HashMap::new(),
            send_counters: HashMap::new(),
        }
    }

    /// Evaluate every metric present in `packet` and return the violations it produced.
    ///
    /// A metric whose rule is not configured is not evaluated and leaves its counter alone.
    pub fn evaluate(
        &mut self,
        packet: &SensorPacket,
        info: &ActiveSensorInfo,
        now: DateTime<Local>,
    ) -> Vec<ViolationRecord> {
        let time = now.time();
        let mut violations = Vec::new();

        let checks = [
            (
                MetricKind::Temperature,
                packet.field(FieldKey::Temperature),
                info.temperature_rule.map(|rule| rule_check(rule, time)),
            ),
            (
                MetricKind::Battery,
                packet.field(FieldKey::Battery),
                Some(battery_check(self.battery_min)),
            ),
            (
                MetricKind::Light,
                packet.field(FieldKey::Light),
                info.light_rule.map(|rule| rule_check(rule, time)),
            ),
        ];

        for (metric, value, check) in checks {
            let (Some(value), Some(check)) = (value, check) else {
                continue;
            };
            let key = (packet.address.clone(), metric);
            match check(value) {
                Some(range) => {
                    *self.send_counters.entry(key).or_insert(0) += 1;
                    violations.push(ViolationRecord {
                        timestamp: now,
                        experiment: info.collection_name.clone(),
                        location: info.location.clone(),
                        address: packet.address.clone(),
                        metric,
                        observed: value,
                        range,
                    });
                }
                None => {
                    self.send_counters.remove(&key);
                }
            }
        }

        if !violations.is_empty() {
            tracing::debug!(
                address = %packet.address,
                experiment = %info.collection_name,
                violations = violations.len(),
                "Threshold violation recorded"
            );
            let accumulator = self
                .accumulators
                .entry(info.collection_name.clone())
                .or_default();
            accumulator.pending.extend(violations.iter().cloned());
            accumulator.recipients = info.recipients();
        }
        violations
    }

    /// Current send counter of `address` for `metric`.
    pub fn send_count(&self, address: &str, metric: MetricKind) -> u32 {
        self.send_counters
            .get(&(address.to_string(), metric))
            .copied()
            .unwrap_or(0)
    }

    /// Pending accumulator of `experiment`.
    pub fn accumulator(&self, experiment: &str) -> Option<&ExperimentAlertAccumulator> {
        self.accumulators.get(experiment)
    }

    /// Take every non-empty accumulator together with a snapshot of the send counters.
    pub fn take_pending(
        &mut self,
    ) -> (
        Vec<(String, ExperimentAlertAccumulator)>,
        HashMap<CounterKey, u32>,
    ) {
        let pending = self
            .accumulators
            .drain()
            .filter(|(_, acc)| !acc.pending.is_empty())
            .collect();
        (pending, self.send_counters.clone())
    }
}

type Check = Box<dyn Fn(f64) -> Option<String>>;

fn rule_check(rule: AlertRule, time: chrono::NaiveTime) -> Check {
    Box::new(move |value| rule.is_violated(value, time).then(|| rule.range_label()))
}

fn battery_check(min: f64) -> Check {
    Box::new(move |value| (value < min).then(|| format!(">= {min}")))
}
