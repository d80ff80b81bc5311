//! Offline check of how well stored risk levels anticipated realized market
//! stress: label each snapshot from the prices that followed it, then
//! compare levels against labels.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::RiskLevel;
use crate::db::RiskLevelRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub price: f64,
}

/// Percent figures over one price window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RealizedStats {
    pub return_pct: f64,
    pub volatility_pct: f64,
    /// Max peak-to-trough decline, never positive.
    pub drawdown_pct: f64,
}

pub fn realized_stats(prices: &[PricePoint]) -> RealizedStats {
    if prices.len() < 2 {
        return RealizedStats::default();
    }
    let mut sorted = prices.to_vec();
    sorted.sort_by_key(|p| p.at);
    let ps: Vec<f64> = sorted.iter().map(|p| p.price).collect();

    let first = ps[0];
    let last = ps[ps.len() - 1];
    let return_pct = if first > 0.0 { (last / first - 1.0) * 100.0 } else { 0.0 };

    let returns: Vec<f64> = ps
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let volatility_pct = if returns.len() > 1 {
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt() * n.sqrt() * 100.0
    } else {
        0.0
    };

    let mut peak = first;
    let mut drawdown_pct: f64 = 0.0;
    for &p in &ps {
        if p > peak {
            peak = p;
        }
        if peak > 0.0 {
            drawdown_pct = drawdown_pct.min((p / peak - 1.0) * 100.0);
        }
    }

    RealizedStats {
        return_pct,
        volatility_pct,
        drawdown_pct,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadEventRule {
    pub vol_threshold: f64,
    pub drawdown_threshold: f64,
}

impl Default for BadEventRule {
    fn default() -> Self {
        Self {
            vol_threshold: 40.0,
            drawdown_threshold: -3.0,
        }
    }
}

impl BadEventRule {
    pub fn is_bad(&self, stats: &RealizedStats) -> bool {
        stats.volatility_pct >= self.vol_threshold || stats.drawdown_pct <= self.drawdown_threshold
    }
}

/// One stored level snapshot paired with what the market did next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalSample {
    pub market_id: String,
    pub snapshot_at: DateTime<Utc>,
    pub level: RiskLevel,
    pub window_minutes: i64,
    pub stats: RealizedStats,
    pub bad_event: bool,
}

/// Label every snapshot with the prices in `[t, t + window]`.
/// Snapshots with fewer than two prices are skipped.
pub fn backfill<F>(
    records: &[RiskLevelRecord],
    window: Duration,
    mut fetch: F,
    rule: &BadEventRule,
) -> Vec<EvalSample>
where
    F: FnMut(&str, DateTime<Utc>, DateTime<Utc>) -> Vec<PricePoint>,
{
    records
        .iter()
        .filter_map(|record| {
            let end = record.created_at + window;
            let prices = fetch(&record.market_id, record.created_at, end);
            if prices.len() < 2 {
                tracing::debug!(
                    market = %record.market_id,
                    "Not enough prices between {} and {end}, skipping",
                    record.created_at
                );
                return None;
            }
            let stats = realized_stats(&prices);
            Some(EvalSample {
                market_id: record.market_id.clone(),
                snapshot_at: record.created_at,
                level: record.risk_level,
                window_minutes: window.num_minutes(),
                bad_event: rule.is_bad(&stats),
                stats,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LevelBucket {
    pub count: usize,
    pub mean_volatility_pct: f64,
    pub mean_drawdown_pct: f64,
    pub mean_return_pct: f64,
    pub bad_event_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub by_level: BTreeMap<RiskLevel, LevelBucket>,
    pub high_risk_threshold: RiskLevel,
    pub confusion: ConfusionMatrix,
}

/// Treats `level >= high_risk_threshold` as an alert raised.
pub fn summarize(samples: &[EvalSample], high_risk_threshold: RiskLevel) -> PerformanceSummary {
    let mut by_level: BTreeMap<RiskLevel, LevelBucket> = BTreeMap::new();
    let mut confusion = ConfusionMatrix::default();

    for s in samples {
        let b = by_level.entry(s.level).or_default();
        b.count += 1;
        b.mean_volatility_pct += s.stats.volatility_pct;
        b.mean_drawdown_pct += s.stats.drawdown_pct;
        b.mean_return_pct += s.stats.return_pct;
        b.bad_event_rate += if s.bad_event { 1.0 } else { 0.0 };

        match (s.level >= high_risk_threshold, s.bad_event) {
            (true, true) => confusion.true_positive += 1,
            (true, false) => confusion.false_positive += 1,
            (false, false) => confusion.true_negative += 1,
            (false, true) => confusion.false_negative += 1,
        }
    }

    // Sums to means
    for b in by_level.values_mut() {
        let n = b.count as f64;
        b.mean_volatility_pct /= n;
        b.mean_drawdown_pct /= n;
        b.mean_return_pct /= n;
        b.bad_event_rate /= n;
    }

    PerformanceSummary {
        by_level,
        high_risk_threshold,
        confusion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(prices: &[f64]) -> Vec<PricePoint> {
        let t0 = Utc::now();
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                at: t0 + Duration::minutes(i as i64),
                price,
            })
            .collect()
    }

    fn sample(level: RiskLevel, bad_event: bool, vol: f64) -> EvalSample {
        EvalSample {
            market_id: "M".into(),
            snapshot_at: Utc::now(),
            level,
            window_minutes: 60,
            stats: RealizedStats {
                return_pct: 0.0,
                volatility_pct: vol,
                drawdown_pct: 0.0,
            },
            bad_event,
        }
    }

    #[test]
    fn short_series_is_flat() {
        assert_eq!(realized_stats(&[]), RealizedStats::default());
        assert_eq!(realized_stats(&series(&[100.0])), RealizedStats::default());
    }

    #[test]
    fn return_and_drawdown() {
        let stats = realized_stats(&series(&[100.0, 110.0, 99.0, 105.0]));
        assert!((stats.return_pct - 5.0).abs() < 1e-9);
        assert!((stats.drawdown_pct - (-10.0)).abs() < 1e-9);
        assert!(stats.volatility_pct > 0.0);
    }

    #[test]
    fn monotone_rise_has_no_drawdown() {
        let stats = realized_stats(&series(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(stats.drawdown_pct, 0.0);
    }

    #[test]
    fn constant_returns_have_zero_volatility() {
        let stats = realized_stats(&series(&[100.0, 110.0, 121.0]));
        assert!(stats.volatility_pct.abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_is_ordered_by_time() {
        let mut points = series(&[100.0, 50.0]);
        points.reverse();
        let stats = realized_stats(&points);
        assert!((stats.return_pct - (-50.0)).abs() < 1e-9);
    }

    #[test]
    fn bad_event_rule_thresholds_inclusive() {
        let rule = BadEventRule::default();
        let calm = RealizedStats::default();
        assert!(!rule.is_bad(&calm));
        assert!(rule.is_bad(&RealizedStats {
            volatility_pct: 40.0,
            ..calm
        }));
        assert!(rule.is_bad(&RealizedStats {
            drawdown_pct: -3.0,
            ..calm
        }));
        assert!(!rule.is_bad(&RealizedStats {
            drawdown_pct: -2.9,
            volatility_pct: 39.9,
            ..calm
        }));
    }

    #[test]
    fn backfill_skips_sparse_windows() {
        let t0 = Utc::now();
        let records: Vec<RiskLevelRecord> = (0..3)
            .map(|i| RiskLevelRecord {
                id: i,
                market_id: "M".into(),
                risk_level: RiskLevel::Warning,
                risk_score: 45.0,
                created_at: t0 + Duration::hours(i),
            })
            .collect();
        let mut calls = Vec::new();
        let samples = backfill(
            &records,
            Duration::minutes(60),
            |market, start, end| {
                calls.push((market.to_string(), start, end));
                if start == t0 {
                    vec![]
                } else {
                    vec![
                        PricePoint { at: start, price: 100.0 },
                        PricePoint { at: end, price: 90.0 },
                    ]
                }
            },
            &BadEventRule::default(),
        );
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].2 - calls[0].1, Duration::minutes(60));
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.bad_event));
        assert_eq!(samples[0].window_minutes, 60);
    }

    #[test]
    fn summary_buckets_and_confusion() {
        let samples = vec![
            sample(RiskLevel::Normal, false, 10.0),
            sample(RiskLevel::Normal, true, 30.0),
            sample(RiskLevel::Warning, true, 50.0),
            sample(RiskLevel::Critical, true, 70.0),
            sample(RiskLevel::Critical, false, 20.0),
        ];
        let summary = summarize(&samples, RiskLevel::Warning);

        let normal = summary.by_level[&RiskLevel::Normal];
        assert_eq!(normal.count, 2);
        assert_eq!(normal.mean_volatility_pct, 20.0);
        assert_eq!(normal.bad_event_rate, 0.5);
        assert!(!summary.by_level.contains_key(&RiskLevel::Caution));

        assert_eq!(
            summary.confusion,
            ConfusionMatrix {
                true_positive: 2,
                false_positive: 1,
                true_negative: 1,
                false_negative: 1,
            }
        );
        assert!((summary.confusion.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.confusion.recall() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_matrix_ratios_are_zero() {
        let summary = summarize(&[], RiskLevel::Warning);
        assert_eq!(summary.confusion.precision(), 0.0);
        assert_eq!(summary.confusion.recall(), 0.0);
        assert!(summary.by_level.is_empty());
    }
}
