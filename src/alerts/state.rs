use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::sink::AlertSink;
use super::{
    AlertConfig, AlertEvent, Direction, DownwardPolicy, NotificationKind, delivery_kind,
    transition_message,
};
use crate::config::AlertSettings;
use crate::core::{Assessment, FactorDomain, MarketRiskState, RiskLevel};
use crate::error::{CycleError, SinkError};

/// What a completed cycle did to a market's state.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// First score for the market. Level set silently.
    Baseline,
    /// Same level as before; only the score moved.
    Unchanged,
    /// Level changed but reversed the previous transition inside the dwell window.
    Suppressed { pending: RiskLevel },
    Transition { event: AlertEvent, delivery: Delivery },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Recorded only: disabled config, below threshold, or a downward move.
    NotQualified,
    Delivered(NotificationKind),
    /// At least one sink refused. The event remains in history.
    Failed {
        kind: NotificationKind,
        errors: Vec<SinkError>,
    },
}

/// Counters over every tracked market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSummary {
    pub tracked: usize,
    pub observed: usize,
    pub high_risk: usize,
    pub degraded: usize,
    pub alerts_held: usize,
}

struct MarketEntry {
    label: String,
    config: AlertConfig,
    slot: RwLock<MarketSlot>,
}

#[derive(Default)]
struct MarketSlot {
    state: Option<MarketRiskState>,
    last_direction: Option<Direction>,
    history: VecDeque<AlertEvent>,
    latest: Option<Assessment>,
    degraded: Option<Vec<FactorDomain>>,
}

/// Owns every market's risk state and alert history.
///
/// The market map is fixed once built; each market has its own lock, so
/// cycles for different markets never contend. Cycles for the same market
/// are serialized by that lock, and sinks are called while it is held to
/// keep per-market emission order.
pub struct AlertStateMachine {
    markets: HashMap<String, MarketEntry>,
    sinks: Vec<Arc<dyn AlertSink>>,
    policy: DownwardPolicy,
    history_capacity: usize,
    min_dwell: Option<chrono::Duration>,
    next_id: AtomicU64,
}

impl AlertStateMachine {
    pub fn new(settings: &AlertSettings) -> Self {
        let min_dwell = (settings.min_dwell_seconds > 0)
            .then(|| chrono::Duration::seconds(settings.min_dwell_seconds as i64));
        Self {
            markets: HashMap::new(),
            sinks: Vec::new(),
            policy: settings.downward,
            history_capacity: settings.history_capacity.max(1),
            min_dwell,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_market(mut self, id: &str, label: &str, config: AlertConfig) -> Self {
        self.markets.insert(
            id.to_string(),
            MarketEntry {
                label: label.to_string(),
                config,
                slot: RwLock::new(MarketSlot::default()),
            },
        );
        self
    }

    /// Continue the id sequence from a previous run, e.g. one past the
    /// highest id already persisted.
    pub fn with_first_id(mut self, first_id: u64) -> Self {
        self.next_id = AtomicU64::new(first_id.max(1));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn entry(&self, market_id: &str) -> Result<&MarketEntry, CycleError> {
        self.markets
            .get(market_id)
            .ok_or_else(|| CycleError::UnknownMarket(market_id.to_string()))
    }

    fn read(&self, market_id: &str) -> Option<RwLockReadGuard<'_, MarketSlot>> {
        self.markets
            .get(market_id)
            .map(|entry| entry.slot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply one completed cycle's assessment.
    pub fn observe(&self, assessment: &Assessment) -> Result<Observation, CycleError> {
        let market_id = assessment.market_id.as_str();
        let entry = self.entry(market_id)?;
        let mut slot = entry.slot.write().unwrap_or_else(PoisonError::into_inner);

        let at = assessment.assessed_at;
        let new_level = assessment.level;
        let score = assessment.risk_score;
        slot.degraded = None;
        slot.latest = Some(assessment.clone());

        let Some(prev) = slot.state else {
            slot.state = Some(MarketRiskState {
                current_level: new_level,
                current_score: score,
                last_transition_at: at,
                updated_at: at,
            });
            info!(market = %market_id, level = %new_level, %score, "Baseline established");
            return Ok(Observation::Baseline);
        };

        let Some(direction) = Direction::between(prev.current_level, new_level) else {
            slot.state = Some(MarketRiskState {
                current_score: score,
                updated_at: at,
                ..prev
            });
            return Ok(Observation::Unchanged);
        };

        if self.dwell_blocks(&prev, slot.last_direction, direction, at) {
            slot.state = Some(MarketRiskState {
                current_score: score,
                updated_at: at,
                ..prev
            });
            debug!(
                market = %market_id,
                from = %prev.current_level,
                to = %new_level,
                "Transition suppressed inside dwell window"
            );
            return Ok(Observation::Suppressed { pending: new_level });
        }

        let event = AlertEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            market_id: market_id.to_string(),
            market_label: entry.label.clone(),
            timestamp: at,
            previous_level: prev.current_level,
            new_level,
            triggering_score: score,
            message: transition_message(prev.current_level, new_level, score),
        };

        slot.state = Some(MarketRiskState {
            current_level: new_level,
            current_score: score,
            last_transition_at: at,
            updated_at: at,
        });
        slot.last_direction = Some(direction);
        slot.history.push_back(event.clone());
        while slot.history.len() > self.history_capacity {
            slot.history.pop_front();
        }
        info!(
            market = %market_id,
            id = event.id,
            from = %event.previous_level,
            to = %event.new_level,
            %score,
            "Risk level transition"
        );

        let delivery = match delivery_kind(prev.current_level, new_level, &entry.config, self.policy) {
            Some(kind) => self.deliver(&event, kind),
            None => Delivery::NotQualified,
        };
        Ok(Observation::Transition { event, delivery })
    }

    fn dwell_blocks(
        &self,
        prev: &MarketRiskState,
        last_direction: Option<Direction>,
        direction: Direction,
        at: DateTime<Utc>,
    ) -> bool {
        match (self.min_dwell, last_direction) {
            (Some(dwell), Some(last)) => {
                last == direction.opposite() && at - prev.last_transition_at < dwell
            }
            _ => false,
        }
    }

    fn deliver(&self, event: &AlertEvent, kind: NotificationKind) -> Delivery {
        let errors: Vec<SinkError> = self
            .sinks
            .iter()
            .filter_map(|sink| match sink.deliver(event, kind) {
                Ok(()) => None,
                Err(e) => {
                    warn!(market = %event.market_id, id = event.id, sink = sink.name(), "Alert delivery failed: {e}");
                    Some(e)
                }
            })
            .collect();
        if errors.is_empty() {
            Delivery::Delivered(kind)
        } else {
            Delivery::Failed { kind, errors }
        }
    }

    /// Fail-closed path: state stays as it was, the market is flagged degraded.
    pub fn mark_degraded(&self, market_id: &str, domains: &[FactorDomain]) -> Result<(), CycleError> {
        let entry = self.entry(market_id)?;
        let mut slot = entry.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.degraded = Some(domains.to_vec());
        Ok(())
    }

    pub fn state(&self, market_id: &str) -> Option<MarketRiskState> {
        self.read(market_id)?.state
    }

    /// Most recent events for one market, newest first.
    pub fn history(&self, market_id: &str, limit: usize) -> Vec<AlertEvent> {
        self.read(market_id)
            .map(|slot| slot.history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Retained events with id greater than `after_id`, in emission order.
    pub fn alerts_after(&self, market_id: &str, after_id: u64) -> Vec<AlertEvent> {
        self.read(market_id)
            .map(|slot| slot.history.iter().filter(|e| e.id > after_id).cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent events across all markets, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        let mut all: Vec<AlertEvent> = self
            .markets
            .keys()
            .flat_map(|id| self.history(id, limit))
            .collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.truncate(limit);
        all
    }

    /// Factor breakdown of the last successful cycle.
    pub fn latest_assessment(&self, market_id: &str) -> Option<Assessment> {
        self.read(market_id)?.latest.clone()
    }

    pub fn degraded_domains(&self, market_id: &str) -> Option<Vec<FactorDomain>> {
        self.read(market_id)?.degraded.clone()
    }

    pub fn is_degraded(&self, market_id: &str) -> bool {
        self.read(market_id).is_some_and(|slot| slot.degraded.is_some())
    }

    pub fn alert_config(&self, market_id: &str) -> Option<AlertConfig> {
        self.markets.get(market_id).map(|entry| entry.config)
    }

    pub fn summary(&self) -> StateSummary {
        let mut summary = StateSummary {
            tracked: self.markets.len(),
            ..StateSummary::default()
        };
        for entry in self.markets.values() {
            let slot = entry.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = slot.state {
                summary.observed += 1;
                if state.current_level >= RiskLevel::Warning {
                    summary.high_risk += 1;
                }
            }
            if slot.degraded.is_some() {
                summary.degraded += 1;
            }
            summary.alerts_held += slot.history.len();
        }
        summary
    }
}
