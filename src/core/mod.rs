pub mod collector;
pub mod market;
pub mod pipeline;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidRiskLevel;

/// One of the three independent signal categories feeding the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorDomain {
    Dex,
    Whale,
    Cex,
}

impl FactorDomain {
    pub const ALL: [FactorDomain; 3] = [FactorDomain::Dex, FactorDomain::Whale, FactorDomain::Cex];

    /// Fixed ceiling for the domain's sub-score. The three sum to 105; the
    /// aggregate is capped at 100.
    pub fn max_score(self) -> f64 {
        match self {
            FactorDomain::Dex => 40.0,
            FactorDomain::Whale => 35.0,
            FactorDomain::Cex => 30.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FactorDomain::Dex => "dex",
            FactorDomain::Whale => "whale",
            FactorDomain::Cex => "cex",
        }
    }
}

impl fmt::Display for FactorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DEX trading activity for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DexMeasurement {
    /// Traded volume relative to pool liquidity.
    pub volume_ratio: f64,
    pub tx_count: f64,
    pub liquidity: f64,
}

/// Whale wallet behaviour for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleMeasurement {
    pub sell_volume: f64,
    pub active_count: f64,
    /// Share of tracked whale holdings sold, 0.0-1.0.
    pub sell_ratio: f64,
}

/// Centralized-exchange flow for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CexMeasurement {
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub net_inflow_ratio: f64,
}

impl CexMeasurement {
    pub fn net_inflow(&self) -> f64 {
        self.total_inflow - self.total_outflow
    }
}

/// A raw measurement bundle tagged with its domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum FactorMeasurement {
    Dex(DexMeasurement),
    Whale(WhaleMeasurement),
    Cex(CexMeasurement),
}

impl FactorMeasurement {
    pub fn domain(&self) -> FactorDomain {
        match self {
            FactorMeasurement::Dex(_) => FactorDomain::Dex,
            FactorMeasurement::Whale(_) => FactorDomain::Whale,
            FactorMeasurement::Cex(_) => FactorDomain::Cex,
        }
    }
}

/// Everything a collector produced for a market in one cycle.
/// `None` means the domain reported no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementSet {
    pub dex: Option<DexMeasurement>,
    pub whale: Option<WhaleMeasurement>,
    pub cex: Option<CexMeasurement>,
}

impl MeasurementSet {
    pub fn complete(dex: DexMeasurement, whale: WhaleMeasurement, cex: CexMeasurement) -> Self {
        Self {
            dex: Some(dex),
            whale: Some(whale),
            cex: Some(cex),
        }
    }

    pub fn missing_domains(&self) -> Vec<FactorDomain> {
        let mut missing = Vec::new();
        if self.dex.is_none() {
            missing.push(FactorDomain::Dex);
        }
        if self.whale.is_none() {
            missing.push(FactorDomain::Whale);
        }
        if self.cex.is_none() {
            missing.push(FactorDomain::Cex);
        }
        missing
    }
}

/// Contribution of a single rule to a factor score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScore {
    pub rule_name: String,
    pub raw_value: f64,
    pub weight: f64,
    pub weighted_score: f64,
}

/// Bounded sub-score for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub domain: FactorDomain,
    pub score: f64,
    pub max_score: f64,
    pub components: Vec<RuleScore>,
    /// The (sanitized) measurement the score was computed from.
    pub measurement: Option<FactorMeasurement>,
    /// Input fields that were non-finite or out of range and got replaced.
    pub sanitized_fields: Vec<String>,
}

impl FactorScore {
    /// A bare score with no breakdown, clipped to `[0, domain max]`.
    pub fn new(domain: FactorDomain, score: f64) -> Self {
        Self {
            domain,
            score: clip(score, domain.max_score()),
            max_score: domain.max_score(),
            components: Vec::new(),
            measurement: None,
            sanitized_fields: Vec::new(),
        }
    }

    /// Score clipped to this domain's ceiling.
    pub fn bounded(&self) -> f64 {
        clip(self.score, self.domain.max_score())
    }
}

fn clip(value: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        0.0
    }
}

/// Aggregate 0-100 risk measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskScore(f64);

impl RiskScore {
    pub const MAX: f64 = 100.0;

    pub fn new(value: f64) -> Self {
        Self(clip(value, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// Discrete risk classification. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RiskLevel {
    Normal = 0,
    Caution = 1,
    Warning = 2,
    Critical = 3,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Normal,
        RiskLevel::Caution,
        RiskLevel::Warning,
        RiskLevel::Critical,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Caution => "CAUTION",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RiskLevel::Normal => "Market conditions are stable",
            RiskLevel::Caution => "Elevated activity detected",
            RiskLevel::Warning => "Significant risk indicators present",
            RiskLevel::Critical => "High risk - immediate attention required",
        }
    }

    /// Severity name used for persisted alerts.
    pub fn severity(self) -> &'static str {
        match self {
            RiskLevel::Normal => "LOW",
            RiskLevel::Caution => "MEDIUM",
            RiskLevel::Warning => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            RiskLevel::Normal => "⚪",
            RiskLevel::Caution => "🟡",
            RiskLevel::Warning => "🟠",
            RiskLevel::Critical => "🔴",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<RiskLevel> for u8 {
    fn from(level: RiskLevel) -> u8 {
        level.as_u8()
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = InvalidRiskLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RiskLevel::Normal),
            1 => Ok(RiskLevel::Caution),
            2 => Ok(RiskLevel::Warning),
            3 => Ok(RiskLevel::Critical),
            other => Err(InvalidRiskLevel(other)),
        }
    }
}

/// Per-domain breakdown for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub dex: FactorScore,
    pub whale: FactorScore,
    pub cex: FactorScore,
}

impl FactorBreakdown {
    pub fn iter(&self) -> impl Iterator<Item = &FactorScore> {
        [&self.dex, &self.whale, &self.cex].into_iter()
    }
}

/// Result of scoring, aggregating and classifying one market for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub market_id: String,
    pub factors: FactorBreakdown,
    pub risk_score: RiskScore,
    pub level: RiskLevel,
    pub assessed_at: DateTime<Utc>,
}

/// Current risk state of a market, owned by the alert state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRiskState {
    pub current_level: RiskLevel,
    pub current_score: RiskScore,
    /// When the level last changed. For a fresh baseline this is the first observation.
    pub last_transition_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
