use serde::Deserialize;

use crate::core::{FactorScore, RiskLevel, RiskScore};
use crate::error::ConfigError;

/// Lower bounds (inclusive) of each non-normal level.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ThresholdTable {
    pub caution: f64,
    pub warning: f64,
    pub critical: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            caution: 20.0,
            warning: 40.0,
            critical: 70.0,
        }
    }
}

impl ThresholdTable {
    /// The bounds must be strictly increasing inside (0, 100] so that the
    /// four ranges partition [0, 100].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 < self.caution
            && self.caution < self.warning
            && self.warning < self.critical
            && self.critical <= RiskScore::MAX;
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::Thresholds {
                caution: self.caution,
                warning: self.warning,
                critical: self.critical,
            })
        }
    }

    pub fn classify(&self, score: RiskScore) -> RiskLevel {
        let s = score.value();
        if s >= self.critical {
            RiskLevel::Critical
        } else if s >= self.warning {
            RiskLevel::Warning
        } else if s >= self.caution {
            RiskLevel::Caution
        } else {
            RiskLevel::Normal
        }
    }

    /// Score range `[low, high)` covered by a level; the top range is closed at 100.
    pub fn range(&self, level: RiskLevel) -> (f64, f64) {
        match level {
            RiskLevel::Normal => (0.0, self.caution),
            RiskLevel::Caution => (self.caution, self.warning),
            RiskLevel::Warning => (self.warning, self.critical),
            RiskLevel::Critical => (self.critical, RiskScore::MAX),
        }
    }
}

/// Sum the three sub-scores, each clipped to its domain ceiling, into a 0-100 score.
pub fn aggregate(dex: &FactorScore, whale: &FactorScore, cex: &FactorScore) -> RiskScore {
    RiskScore::new(dex.bounded() + whale.bounded() + cex.bounded())
}

/// Classify with the default threshold table.
pub fn classify(score: RiskScore) -> RiskLevel {
    ThresholdTable::default().classify(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FactorDomain;

    fn scores(d: f64, w: f64, c: f64) -> (FactorScore, FactorScore, FactorScore) {
        (
            FactorScore::new(FactorDomain::Dex, d),
            FactorScore::new(FactorDomain::Whale, w),
            FactorScore::new(FactorDomain::Cex, c),
        )
    }

    #[test]
    fn boundary_values() {
        let cases = [
            (0.0, RiskLevel::Normal),
            (19.0, RiskLevel::Normal),
            (19.99, RiskLevel::Normal),
            (20.0, RiskLevel::Caution),
            (39.0, RiskLevel::Caution),
            (40.0, RiskLevel::Warning),
            (69.0, RiskLevel::Warning),
            (70.0, RiskLevel::Critical),
            (100.0, RiskLevel::Critical),
        ];
        for (score, expected) in cases {
            assert_eq!(classify(RiskScore::new(score)), expected, "score {score}");
        }
    }

    #[test]
    fn classify_non_decreasing() {
        let mut prev = RiskLevel::Normal;
        for tenth in 0..=1000 {
            let level = classify(RiskScore::new(tenth as f64 / 10.0));
            assert!(level >= prev, "level dropped at {}", tenth as f64 / 10.0);
            prev = level;
        }
    }

    #[test]
    fn aggregate_is_capped_sum() {
        for d in [0.0, 10.0, 28.0, 40.0] {
            for w in [0.0, 7.5, 21.0, 35.0] {
                for c in [0.0, 13.0, 30.0] {
                    let (ds, ws, cs) = scores(d, w, c);
                    let expected = (d + w + c).min(100.0);
                    assert!((aggregate(&ds, &ws, &cs).value() - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn aggregate_clamps_out_of_domain_inputs() {
        let mut dex = FactorScore::new(FactorDomain::Dex, 0.0);
        dex.score = 90.0;
        let (_, ws, cs) = scores(0.0, 35.0, 30.0);
        assert_eq!(aggregate(&dex, &ws, &cs).value(), 100.0);

        dex.score = -20.0;
        assert_eq!(aggregate(&dex, &ws, &cs).value(), 65.0);
    }

    #[test]
    fn aggregate_then_classify_is_idempotent() {
        let (ds, ws, cs) = scores(28.0, 21.0, 13.0);
        let first = classify(aggregate(&ds, &ws, &cs));
        for _ in 0..10 {
            assert_eq!(classify(aggregate(&ds, &ws, &cs)), first);
        }
    }

    #[test]
    fn worked_example_is_warning() {
        let (ds, ws, cs) = scores(28.0, 21.0, 13.0);
        let score = aggregate(&ds, &ws, &cs);
        assert_eq!(score.value(), 62.0);
        assert_eq!(classify(score), RiskLevel::Warning);
    }

    #[test]
    fn default_table_is_valid() {
        assert!(ThresholdTable::default().validate().is_ok());
    }

    #[test]
    fn overlapping_table_rejected() {
        let table = ThresholdTable {
            caution: 40.0,
            warning: 30.0,
            critical: 70.0,
        };
        assert!(table.validate().is_err());
        let table = ThresholdTable {
            caution: 0.0,
            warning: 30.0,
            critical: 70.0,
        };
        assert!(table.validate().is_err());
        let table = ThresholdTable {
            caution: 20.0,
            warning: 40.0,
            critical: 120.0,
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn custom_table_classifies() {
        let table = ThresholdTable {
            caution: 10.0,
            warning: 50.0,
            critical: 90.0,
        };
        assert_eq!(table.classify(RiskScore::new(10.0)), RiskLevel::Caution);
        assert_eq!(table.classify(RiskScore::new(89.9)), RiskLevel::Warning);
        assert_eq!(table.range(RiskLevel::Critical), (90.0, 100.0));
    }
}
