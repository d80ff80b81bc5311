use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::alerts::{AlertConfig, DownwardPolicy};
use crate::core::market::MarketKind;
use crate::error::ConfigError;
use crate::signals::score::ThresholdTable;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub markets: Vec<MarketConfig>,
    pub thresholds: ThresholdTable,
    pub scoring: ScoringConfig,
    pub alerts: AlertSettings,
    pub scheduler: SchedulerConfig,
    pub collector: CollectorConfig,
    pub notifications: NotificationConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub id: String,
    pub label: String,
    pub kind: MarketKind,
    pub address: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    /// Per-market override of `alerts.default`.
    pub alert: Option<AlertConfig>,
}

/// Weight and midpoint of one saturating rule.
///
/// A field left out of the config file stays unset (NaN) until
/// [`ScoringConfig::fill_missing`] takes it from the rule's default.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RuleCurve {
    #[serde(default = "RuleCurve::unset")]
    pub weight: f64,
    /// Input value at which the rule reaches half its weight.
    #[serde(default = "RuleCurve::unset")]
    pub midpoint: f64,
}

impl RuleCurve {
    pub const fn new(weight: f64, midpoint: f64) -> Self {
        Self { weight, midpoint }
    }

    fn unset() -> f64 {
        f64::NAN
    }

    fn or(self, fallback: RuleCurve) -> Self {
        let pick = |value: f64, default: f64| if value.is_nan() { default } else { value };
        Self {
            weight: pick(self.weight, fallback.weight),
            midpoint: pick(self.midpoint, fallback.midpoint),
        }
    }

    fn is_valid(&self) -> bool {
        self.weight.is_finite() && self.weight >= 0.0 && self.midpoint.is_finite() && self.midpoint > 0.0
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub dex: DexWeights,
    pub whale: WhaleWeights,
    pub cex: CexWeights,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DexWeights {
    pub volume_ratio: RuleCurve,
    pub tx_count: RuleCurve,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WhaleWeights {
    pub sell_ratio: RuleCurve,
    pub sell_volume: RuleCurve,
    pub active_count: RuleCurve,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CexWeights {
    pub net_inflow_ratio: RuleCurve,
    pub net_inflow: RuleCurve,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertSettings {
    /// Alert events retained per market; oldest are evicted first.
    pub history_capacity: usize,
    pub downward: DownwardPolicy,
    /// Minimum time before a transition may reverse direction. 0 disables the guard.
    pub min_dwell_seconds: u64,
    pub default: AlertConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub collect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub snapshot_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            kind: MarketKind::default(),
            address: None,
            description: None,
            active: true,
            alert: None,
        }
    }
}

impl Default for DexWeights {
    fn default() -> Self {
        Self {
            volume_ratio: RuleCurve::new(28.0, 0.2),
            tx_count: RuleCurve::new(12.0, 150.0),
        }
    }
}

impl Default for WhaleWeights {
    fn default() -> Self {
        Self {
            sell_ratio: RuleCurve::new(20.0, 0.05),
            sell_volume: RuleCurve::new(9.0, 500.0),
            active_count: RuleCurve::new(6.0, 5.0),
        }
    }
}

impl Default for CexWeights {
    fn default() -> Self {
        Self {
            net_inflow_ratio: RuleCurve::new(20.0, 0.04),
            net_inflow: RuleCurve::new(10.0, 1000.0),
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            downward: DownwardPolicy::default(),
            min_dwell_seconds: 0,
            default: AlertConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            collect_timeout_ms: 5_000,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "data/measurements.json".into(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/chainmonitor.db".into(),
        }
    }
}

impl ScoringConfig {
    fn curves(&self) -> [(&'static str, RuleCurve); 7] {
        [
            ("dex.volume_ratio", self.dex.volume_ratio),
            ("dex.tx_count", self.dex.tx_count),
            ("whale.sell_ratio", self.whale.sell_ratio),
            ("whale.sell_volume", self.whale.sell_volume),
            ("whale.active_count", self.whale.active_count),
            ("cex.net_inflow_ratio", self.cex.net_inflow_ratio),
            ("cex.net_inflow", self.cex.net_inflow),
        ]
    }

    /// Complete partially overridden curves from the built-in weights.
    pub fn fill_missing(&mut self) {
        let d = Self::default();
        let pairs = [
            (&mut self.dex.volume_ratio, d.dex.volume_ratio),
            (&mut self.dex.tx_count, d.dex.tx_count),
            (&mut self.whale.sell_ratio, d.whale.sell_ratio),
            (&mut self.whale.sell_volume, d.whale.sell_volume),
            (&mut self.whale.active_count, d.whale.active_count),
            (&mut self.cex.net_inflow_ratio, d.cex.net_inflow_ratio),
            (&mut self.cex.net_inflow, d.cex.net_inflow),
        ];
        for (curve, fallback) in pairs {
            *curve = curve.or(fallback);
        }
    }

    /// Fields not yet filled count as their defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut filled = self.clone();
        filled.fill_missing();
        for (rule, curve) in filled.curves() {
            if !curve.is_valid() {
                return Err(ConfigError::RuleCurve {
                    rule,
                    weight: curve.weight,
                    midpoint: curve.midpoint,
                });
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::with_default_market();
        }
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    return Self::with_default_market();
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                return Self::with_default_market();
            }
        };
        config.validated()
    }

    /// Defaults plus the single built-in market, used when no file is given.
    pub fn with_default_market() -> Self {
        let market = MarketConfig {
            id: "UNISWAP_USDC_WETH".into(),
            label: "Uniswap V2 USDC/WETH".into(),
            kind: MarketKind::DexPool,
            address: Some("0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc".into()),
            description: Some("Uniswap V2 USDC/WETH Pool".into()),
            ..MarketConfig::default()
        };
        Self {
            markets: vec![market],
            ..Self::default()
        }
    }

    /// First problem found in the thresholds, rule curves or market ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.scoring.validate()?;
        let mut seen = HashSet::new();
        match self.markets.iter().find(|m| !seen.insert(m.id.as_str())) {
            Some(dup) => Err(ConfigError::DuplicateMarket(dup.id.clone())),
            None => Ok(()),
        }
    }

    /// Replace invalid sections with their defaults and drop unusable markets.
    pub fn validated(mut self) -> Self {
        self.scoring.fill_missing();
        if let Err(e) = self.thresholds.validate() {
            tracing::warn!("{e}, using default thresholds");
            self.thresholds = ThresholdTable::default();
        }
        if let Err(e) = self.scoring.validate() {
            tracing::warn!("{e}, using default scoring weights");
            self.scoring = ScoringConfig::default();
        }
        if self.alerts.history_capacity == 0 {
            tracing::warn!("alerts.history_capacity must be positive, using 50");
            self.alerts.history_capacity = AlertSettings::default().history_capacity;
        }
        let mut seen = HashSet::new();
        self.markets.retain(|m| {
            if m.id.trim().is_empty() {
                tracing::warn!("Market without id ignored (label {:?})", m.label);
                return false;
            }
            let fresh = seen.insert(m.id.clone());
            if !fresh {
                tracing::warn!("{}, ignoring later entry", ConfigError::DuplicateMarket(m.id.clone()));
            }
            fresh
        });
        self
    }

    pub fn alert_config_for(&self, market: &MarketConfig) -> AlertConfig {
        market.alert.unwrap_or(self.alerts.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RiskLevel;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [[markets]]
            id = "UNISWAP_USDC_WETH"
            label = "USDC/WETH"
            kind = "dex_pool"

            [[markets]]
            id = "WHALE_1"
            label = "Whale 1"
            kind = "whale"
            active = false
            alert = { threshold = 3, enabled = false }

            [thresholds]
            caution = 25
            warning = 45
            critical = 75

            [scoring.dex.volume_ratio]
            weight = 30
            midpoint = 0.25

            [alerts]
            history_capacity = 10
            downward = "notify_resolved"
            min_dwell_seconds = 120
            default = { threshold = 1, enabled = true }

            [scheduler]
            poll_interval_secs = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let config = config.validated();

        assert_eq!(config.markets.len(), 2);
        assert!(config.markets[0].active);
        assert!(!config.markets[1].active);
        assert_eq!(config.markets[1].kind, MarketKind::Whale);
        assert_eq!(config.thresholds.caution, 25.0);
        assert_eq!(config.scoring.dex.volume_ratio, RuleCurve::new(30.0, 0.25));
        assert_eq!(config.scoring.dex.tx_count, RuleCurve::new(12.0, 150.0));
        assert_eq!(config.alerts.history_capacity, 10);
        assert_eq!(config.alerts.downward, DownwardPolicy::NotifyResolved);
        assert_eq!(config.alerts.min_dwell_seconds, 120);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.collect_timeout_ms, 5_000);

        let first = config.alert_config_for(&config.markets[0]);
        assert_eq!(first.threshold, RiskLevel::Caution);
        let second = config.alert_config_for(&config.markets[1]);
        assert_eq!(second.threshold, RiskLevel::Critical);
        assert!(!second.enabled);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.markets.is_empty());
        assert_eq!(config.thresholds, ThresholdTable::default());
        assert_eq!(config.alerts.history_capacity, 50);
        assert_eq!(config.alerts.downward, DownwardPolicy::RecordOnly);
        assert_eq!(config.alerts.default.threshold, RiskLevel::Warning);
    }

    #[test]
    fn invalid_threshold_level_rejected() {
        let toml = r#"
            [alerts]
            default = { threshold = 9, enabled = true }
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn overlapping_thresholds_replaced() {
        let toml = r#"
            [thresholds]
            caution = 50
            warning = 40
            critical = 70
        "#;
        let config = toml::from_str::<Config>(toml).unwrap().validated();
        assert_eq!(config.thresholds, ThresholdTable::default());
    }

    #[test]
    fn invalid_rule_curve_replaced() {
        let toml = r#"
            [scoring.whale.sell_ratio]
            weight = 20
            midpoint = 0
        "#;
        let config = toml::from_str::<Config>(toml).unwrap();
        assert!(config.scoring.validate().is_err());
        let config = config.validated();
        assert_eq!(config.scoring.whale.sell_ratio, RuleCurve::new(20.0, 0.05));
    }

    #[test]
    fn partial_rule_curve_keeps_rest_of_config() {
        let toml = r#"
            [scoring.dex.volume_ratio]
            weight = 30

            [scoring.cex.net_inflow]
            midpoint = 2000

            [[markets]]
            id = "USDC-WETH"
        "#;
        let config = toml::from_str::<Config>(toml).unwrap();
        assert!(config.validate().is_ok());
        let config = config.validated();
        assert_eq!(config.scoring.dex.volume_ratio, RuleCurve::new(30.0, 0.2));
        assert_eq!(config.scoring.cex.net_inflow, RuleCurve::new(10.0, 2000.0));
        assert_eq!(config.scoring.dex.tx_count, RuleCurve::new(12.0, 150.0));
        assert_eq!(config.markets.len(), 1);
    }

    #[test]
    fn duplicate_markets_dropped() {
        let toml = r#"
            [[markets]]
            id = "A"
            label = "first"

            [[markets]]
            id = "A"
            label = "second"
        "#;
        let config = toml::from_str::<Config>(toml).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::DuplicateMarket("A".into())));
        let config = config.validated();
        assert_eq!(config.markets.len(), 1);
        assert_eq!(config.markets[0].label, "first");
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn market_without_id_dropped() {
        let toml = r#"
            [[markets]]
            label = "anonymous"
        "#;
        let config = toml::from_str::<Config>(toml).unwrap().validated();
        assert!(config.markets.is_empty());
    }

    #[test]
    fn missing_file_yields_default_market() {
        let config = Config::load("/nonexistent/chainmonitor.toml");
        assert_eq!(config.markets.len(), 1);
        assert_eq!(config.markets[0].id, "UNISWAP_USDC_WETH");
        assert!(config.markets[0].address.is_some());
    }
}
