use thiserror::Error;

use crate::core::FactorDomain;

/// Why a market's aggregation cycle produced no assessment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("market {0} is not configured")]
    UnknownMarket(String),

    #[error("market {0} is deactivated")]
    InactiveMarket(String),

    /// At least one domain reported no data. Prior state is retained.
    #[error("market {market_id}: missing measurement for {domains:?}")]
    MissingMeasurement {
        market_id: String,
        domains: Vec<FactorDomain>,
    },

    #[error("market {market_id}: measurement collection timed out after {timeout_ms}ms")]
    CollectTimeout { market_id: String, timeout_ms: u64 },
}

/// An alert sink could not accept an event. The event stays recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("alert sink {0} is closed")]
    Closed(&'static str),

    #[error("alert sink {sink} rejected event {event_id}: {reason}")]
    Rejected {
        sink: &'static str,
        event_id: u64,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("threshold table must satisfy 0 < caution < warning < critical <= 100, got {caution}/{warning}/{critical}")]
    Thresholds {
        caution: f64,
        warning: f64,
        critical: f64,
    },

    #[error("rule {rule} has invalid curve (weight {weight}, midpoint {midpoint})")]
    RuleCurve {
        rule: &'static str,
        weight: f64,
        midpoint: f64,
    },

    #[error("duplicate market id {0}")]
    DuplicateMarket(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid risk level {0}, expected 0-3")]
pub struct InvalidRiskLevel(pub u8);
