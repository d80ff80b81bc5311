pub mod rules;
pub mod score;

use tracing::warn;

use crate::config::ScoringConfig;
use crate::core::{
    CexMeasurement, DexMeasurement, FactorBreakdown, FactorDomain, FactorMeasurement, FactorScore,
    RuleScore, WhaleMeasurement,
};
use rules::Rule;

/// Applies the per-domain rules and produces bounded sub-scores.
pub struct FactorScorer {
    rules: Vec<Box<dyn Rule + Send + Sync>>,
}

impl FactorScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            rules: rules::default_rules(config),
        }
    }

    /// Score one domain. Never fails: invalid fields are replaced and
    /// reported in `sanitized_fields`.
    pub fn score(&self, domain: FactorDomain, measurement: &FactorMeasurement) -> FactorScore {
        let (clean, sanitized_fields) = sanitize(measurement);
        if !sanitized_fields.is_empty() {
            warn!(%domain, fields = ?sanitized_fields, "Invalid measurement fields clamped");
        }

        let components: Vec<RuleScore> = self
            .rules
            .iter()
            .filter(|rule| rule.domain() == domain)
            .map(|rule| {
                let raw_value = rule.evaluate(&clean);
                let weight = rule.weight();
                RuleScore {
                    rule_name: rule.name().to_string(),
                    raw_value,
                    weight,
                    weighted_score: raw_value * weight,
                }
            })
            .collect();

        let total: f64 = components.iter().map(|c| c.weighted_score).sum();
        let mut score = FactorScore::new(domain, total);
        score.components = components;
        score.measurement = Some(clean);
        score.sanitized_fields = sanitized_fields;
        score
    }

    pub fn score_all(
        &self,
        dex: &DexMeasurement,
        whale: &WhaleMeasurement,
        cex: &CexMeasurement,
    ) -> FactorBreakdown {
        FactorBreakdown {
            dex: self.score(FactorDomain::Dex, &FactorMeasurement::Dex(*dex)),
            whale: self.score(FactorDomain::Whale, &FactorMeasurement::Whale(*whale)),
            cex: self.score(FactorDomain::Cex, &FactorMeasurement::Cex(*cex)),
        }
    }
}

/// Replace non-finite and out-of-range fields. Returns the cleaned
/// measurement and the names of every field that was touched.
fn sanitize(measurement: &FactorMeasurement) -> (FactorMeasurement, Vec<String>) {
    let mut fields = Vec::new();
    let clean = match *measurement {
        FactorMeasurement::Dex(d) => FactorMeasurement::Dex(DexMeasurement {
            volume_ratio: non_negative(d.volume_ratio, "dex.volume_ratio", &mut fields),
            tx_count: non_negative(d.tx_count, "dex.tx_count", &mut fields),
            liquidity: non_negative(d.liquidity, "dex.liquidity", &mut fields),
        }),
        FactorMeasurement::Whale(w) => FactorMeasurement::Whale(WhaleMeasurement {
            sell_volume: non_negative(w.sell_volume, "whale.sell_volume", &mut fields),
            active_count: non_negative(w.active_count, "whale.active_count", &mut fields),
            sell_ratio: within(w.sell_ratio, 0.0, 1.0, "whale.sell_ratio", &mut fields),
        }),
        // A negative net inflow ratio is a legitimate net outflow.
        FactorMeasurement::Cex(c) => FactorMeasurement::Cex(CexMeasurement {
            total_inflow: non_negative(c.total_inflow, "cex.total_inflow", &mut fields),
            total_outflow: non_negative(c.total_outflow, "cex.total_outflow", &mut fields),
            net_inflow_ratio: within(c.net_inflow_ratio, -1.0, 1.0, "cex.net_inflow_ratio", &mut fields),
        }),
    };
    (clean, fields)
}

fn non_negative(value: f64, field: &str, fields: &mut Vec<String>) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        fields.push(field.to_string());
        0.0
    }
}

fn within(value: f64, low: f64, high: f64, field: &str, fields: &mut Vec<String>) -> f64 {
    if !value.is_finite() {
        fields.push(field.to_string());
        0.0
    } else if value < low || value > high {
        fields.push(field.to_string());
        value.clamp(low, high)
    } else {
        value
    }
}
