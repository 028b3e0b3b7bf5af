//! Threshold alerting: rules, per-reading evaluation and digest dispatch.

pub mod digest;
pub mod dispatcher;
pub mod evaluator;
pub mod rules;

pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use evaluator::{AlertEvaluator, ExperimentAlertAccumulator, ViolationRecord};
pub use rules::{AlertRule, MetricKind};
