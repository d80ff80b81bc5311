use crate::config::{RuleCurve, ScoringConfig};
use crate::core::{FactorDomain, FactorMeasurement};

/// A scoring rule that evaluates a single field of one domain's measurement.
/// Returns a normalized value 0.0-1.0; measurements of another domain yield 0.
pub trait Rule {
    fn name(&self) -> &str;
    fn domain(&self) -> FactorDomain;
    fn weight(&self) -> f64;
    fn evaluate(&self, m: &FactorMeasurement) -> f64;
}

/// Saturating curve: 0 at x <= 0, 0.5 at `midpoint`, approaching 1.
/// Non-decreasing in `x`.
pub fn saturate(x: f64, midpoint: f64) -> f64 {
    if x.is_nan() || x <= 0.0 || midpoint.is_nan() || midpoint <= 0.0 {
        return 0.0;
    }
    1.0 - 1.0 / (1.0 + x / midpoint)
}

/// Build every rule from configured weights and midpoints.
pub fn default_rules(config: &ScoringConfig) -> Vec<Box<dyn Rule + Send + Sync>> {
    vec![
        Box::new(DexVolumeRatioRule(config.dex.volume_ratio)),
        Box::new(DexTxCountRule(config.dex.tx_count)),
        Box::new(WhaleSellRatioRule(config.whale.sell_ratio)),
        Box::new(WhaleSellVolumeRule(config.whale.sell_volume)),
        Box::new(WhaleActiveCountRule(config.whale.active_count)),
        Box::new(CexNetInflowRatioRule(config.cex.net_inflow_ratio)),
        Box::new(CexNetInflowRule(config.cex.net_inflow)),
    ]
}

// --- DEX ---

/// Volume relative to liquidity: heavy turnover in a thin pool.
struct DexVolumeRatioRule(RuleCurve);
impl Rule for DexVolumeRatioRule {
    fn name(&self) -> &str { "dex_volume_ratio" }
    fn domain(&self) -> FactorDomain { FactorDomain::Dex }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Dex(dex) => saturate(dex.volume_ratio, self.0.midpoint),
            _ => 0.0,
        }
    }
}

struct DexTxCountRule(RuleCurve);
impl Rule for DexTxCountRule {
    fn name(&self) -> &str { "dex_tx_count" }
    fn domain(&self) -> FactorDomain { FactorDomain::Dex }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Dex(dex) => saturate(dex.tx_count, self.0.midpoint),
            _ => 0.0,
        }
    }
}

// --- Whale ---

/// Share of whale holdings being sold. The strongest whale signal.
struct WhaleSellRatioRule(RuleCurve);
impl Rule for WhaleSellRatioRule {
    fn name(&self) -> &str { "whale_sell_ratio" }
    fn domain(&self) -> FactorDomain { FactorDomain::Whale }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Whale(whale) => {
                saturate(whale.sell_ratio.clamp(0.0, 1.0), self.0.midpoint)
            }
            _ => 0.0,
        }
    }
}

struct WhaleSellVolumeRule(RuleCurve);
impl Rule for WhaleSellVolumeRule {
    fn name(&self) -> &str { "whale_sell_volume" }
    fn domain(&self) -> FactorDomain { FactorDomain::Whale }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Whale(whale) => saturate(whale.sell_volume, self.0.midpoint),
            _ => 0.0,
        }
    }
}

/// Number of distinct whale wallets active this cycle.
struct WhaleActiveCountRule(RuleCurve);
impl Rule for WhaleActiveCountRule {
    fn name(&self) -> &str { "whale_active_count" }
    fn domain(&self) -> FactorDomain { FactorDomain::Whale }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Whale(whale) => saturate(whale.active_count, self.0.midpoint),
            _ => 0.0,
        }
    }
}

// --- CEX ---

/// Net inflow to exchanges relative to total flow: potential sell pressure.
struct CexNetInflowRatioRule(RuleCurve);
impl Rule for CexNetInflowRatioRule {
    fn name(&self) -> &str { "cex_net_inflow_ratio" }
    fn domain(&self) -> FactorDomain { FactorDomain::Cex }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Cex(cex) => saturate(cex.net_inflow_ratio, self.0.midpoint),
            _ => 0.0,
        }
    }
}

/// Absolute net inflow. Net outflow (withdrawals) contributes nothing.
struct CexNetInflowRule(RuleCurve);
impl Rule for CexNetInflowRule {
    fn name(&self) -> &str { "cex_net_inflow" }
    fn domain(&self) -> FactorDomain { FactorDomain::Cex }
    fn weight(&self) -> f64 { self.0.weight }
    fn evaluate(&self, m: &FactorMeasurement) -> f64 {
        match m {
            FactorMeasurement::Cex(cex) => saturate(cex.net_inflow().max(0.0), self.0.midpoint),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CexMeasurement, DexMeasurement, WhaleMeasurement};

    fn rules() -> Vec<Box<dyn Rule + Send + Sync>> {
        default_rules(&ScoringConfig::default())
    }

    fn rule(name: &str) -> Box<dyn Rule + Send + Sync> {
        rules()
            .into_iter()
            .find(|r| r.name() == name)
            .unwrap_or_else(|| panic!("no rule {name}"))
    }

    fn dex(volume_ratio: f64, tx_count: f64) -> FactorMeasurement {
        FactorMeasurement::Dex(DexMeasurement {
            volume_ratio,
            tx_count,
            liquidity: 1_000_000.0,
        })
    }

    fn whale(sell_volume: f64, active_count: f64, sell_ratio: f64) -> FactorMeasurement {
        FactorMeasurement::Whale(WhaleMeasurement {
            sell_volume,
            active_count,
            sell_ratio,
        })
    }

    fn cex(inflow: f64, outflow: f64, ratio: f64) -> FactorMeasurement {
        FactorMeasurement::Cex(CexMeasurement {
            total_inflow: inflow,
            total_outflow: outflow,
            net_inflow_ratio: ratio,
        })
    }

    #[test]
    fn saturate_shape() {
        assert_eq!(saturate(0.0, 1.0), 0.0);
        assert_eq!(saturate(-5.0, 1.0), 0.0);
        assert!((saturate(1.0, 1.0) - 0.5).abs() < 1e-9);
        assert!(saturate(1000.0, 1.0) > 0.99);
        assert_eq!(saturate(f64::NAN, 1.0), 0.0);
        assert_eq!(saturate(1.0, 0.0), 0.0);
    }

    #[test]
    fn saturate_monotonic() {
        let mut prev = 0.0;
        for i in 0..500 {
            let v = saturate(i as f64 * 0.01, 0.2);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn volume_ratio_midpoint() {
        let score = rule("dex_volume_ratio").evaluate(&dex(0.2, 0.0));
        assert!((score - 0.5).abs() < 0.01, "Expected ~0.5, got {score}");
    }

    #[test]
    fn tx_count_zero() {
        assert_eq!(rule("dex_tx_count").evaluate(&dex(0.0, 0.0)), 0.0);
    }

    #[test]
    fn sell_ratio_clamped_above_one() {
        let r = rule("whale_sell_ratio");
        assert_eq!(r.evaluate(&whale(0.0, 0.0, 4.0)), r.evaluate(&whale(0.0, 0.0, 1.0)));
    }

    #[test]
    fn sell_volume_high() {
        assert!(rule("whale_sell_volume").evaluate(&whale(50_000.0, 0.0, 0.0)) > 0.98);
    }

    #[test]
    fn active_count_midpoint() {
        let score = rule("whale_active_count").evaluate(&whale(0.0, 5.0, 0.0));
        assert!((score - 0.5).abs() < 0.01);
    }

    #[test]
    fn net_outflow_contributes_nothing() {
        assert_eq!(rule("cex_net_inflow").evaluate(&cex(100.0, 900.0, 0.0)), 0.0);
    }

    #[test]
    fn net_inflow_midpoint() {
        let score = rule("cex_net_inflow").evaluate(&cex(1500.0, 500.0, 0.0));
        assert!((score - 0.5).abs() < 0.01);
    }

    #[test]
    fn net_inflow_ratio_high() {
        assert!(rule("cex_net_inflow_ratio").evaluate(&cex(0.0, 0.0, 0.9)) > 0.9);
    }

    #[test]
    fn wrong_domain_scores_zero() {
        for r in rules() {
            let foreign = match r.domain() {
                FactorDomain::Dex => whale(1e6, 100.0, 1.0),
                FactorDomain::Whale => cex(1e6, 0.0, 1.0),
                FactorDomain::Cex => dex(10.0, 1e6),
            };
            assert_eq!(r.evaluate(&foreign), 0.0, "{} scored a foreign measurement", r.name());
        }
    }

    #[test]
    fn default_weights_fill_domain_max() {
        for domain in FactorDomain::ALL {
            let total: f64 = rules()
                .iter()
                .filter(|r| r.domain() == domain)
                .map(|r| r.weight())
                .sum();
            assert_eq!(total, domain.max_score(), "{domain}");
        }
    }

    #[test]
    fn all_rules_names_unique() {
        let rules = rules();
        let mut names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        let len = names.len();
        names.sort();
        names.dedup();
        assert_eq!(len, names.len());
    }
}
