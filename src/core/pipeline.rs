use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::collector::FactorCollector;
use super::market::{Market, MarketRegistry};
use super::{Assessment, CexMeasurement, DexMeasurement, FactorDomain, MeasurementSet, WhaleMeasurement};
use crate::alerts::sink::AlertSink;
use crate::alerts::state::{AlertStateMachine, Delivery, Observation};
use crate::alerts::{AlertEvent, NotificationKind};
use crate::config::{Config, SchedulerConfig};
use crate::db::SharedDatabase;
use crate::error::CycleError;
use crate::signals::FactorScorer;
use crate::signals::score::{ThresholdTable, aggregate};

/// Outcome of one successful aggregation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub assessment: Assessment,
    pub observation: Observation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub total_markets: usize,
    pub active_markets: usize,
    pub high_risk_markets: usize,
    pub degraded_markets: usize,
    pub alerts_held: usize,
}

/// Messages from the engine to whatever presents results.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Cycle(CycleReport),
    Alert {
        event: AlertEvent,
        kind: NotificationKind,
    },
    Degraded {
        market_id: String,
        domains: Vec<FactorDomain>,
    },
    Skipped {
        market_id: String,
        reason: String,
    },
}

/// Scorer, aggregator and state machine wired over a fixed market set.
pub struct RiskEngine {
    registry: MarketRegistry,
    scorer: FactorScorer,
    thresholds: ThresholdTable,
    alerts: AlertStateMachine,
}

impl RiskEngine {
    pub fn new(
        registry: MarketRegistry,
        scorer: FactorScorer,
        thresholds: ThresholdTable,
        alerts: AlertStateMachine,
    ) -> Self {
        Self {
            registry,
            scorer,
            thresholds,
            alerts,
        }
    }

    /// Build from a validated config. Every configured market gets a state slot.
    pub fn from_config(config: &Config, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let registry = MarketRegistry::from_configs(&config.markets);
        let mut alerts = AlertStateMachine::new(&config.alerts);
        for market in &config.markets {
            let label = registry.get(&market.id).map_or(market.id.as_str(), |m| m.label.as_str());
            alerts = alerts.with_market(&market.id, label, config.alert_config_for(market));
        }
        for sink in sinks {
            alerts = alerts.with_sink(sink);
        }
        Self::new(
            registry,
            FactorScorer::new(&config.scoring),
            config.thresholds,
            alerts,
        )
    }

    /// See [`AlertStateMachine::with_first_id`].
    pub fn with_first_event_id(mut self, first_id: u64) -> Self {
        self.alerts = self.alerts.with_first_id(first_id);
        self
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    pub fn alerts(&self) -> &AlertStateMachine {
        &self.alerts
    }

    /// Score, aggregate and classify without touching any state.
    pub fn assess(
        &self,
        market_id: &str,
        dex: &DexMeasurement,
        whale: &WhaleMeasurement,
        cex: &CexMeasurement,
        at: DateTime<Utc>,
    ) -> Assessment {
        let factors = self.scorer.score_all(dex, whale, cex);
        let risk_score = aggregate(&factors.dex, &factors.whale, &factors.cex);
        Assessment {
            market_id: market_id.to_string(),
            level: self.thresholds.classify(risk_score),
            factors,
            risk_score,
            assessed_at: at,
        }
    }

    /// One aggregation cycle. Any missing domain aborts the cycle and leaves
    /// the market's level and score as they were.
    pub fn run_cycle(
        &self,
        market_id: &str,
        set: &MeasurementSet,
        at: DateTime<Utc>,
    ) -> Result<CycleReport, CycleError> {
        let market = self
            .registry
            .get(market_id)
            .ok_or_else(|| CycleError::UnknownMarket(market_id.to_string()))?;
        if !market.is_active() {
            return Err(CycleError::InactiveMarket(market_id.to_string()));
        }

        let (Some(dex), Some(whale), Some(cex)) = (set.dex, set.whale, set.cex) else {
            let domains = set.missing_domains();
            self.alerts.mark_degraded(market_id, &domains)?;
            let err = CycleError::MissingMeasurement {
                market_id: market_id.to_string(),
                domains,
            };
            warn!("{err}, keeping previous state");
            return Err(err);
        };

        let assessment = self.assess(market_id, &dex, &whale, &cex, at);
        debug!(
            market = %market_id,
            dex = assessment.factors.dex.score,
            whale = assessment.factors.whale.score,
            cex = assessment.factors.cex.score,
            score = %assessment.risk_score,
            level = %assessment.level,
            "Cycle scored"
        );
        let observation = self.alerts.observe(&assessment)?;
        Ok(CycleReport {
            assessment,
            observation,
        })
    }

    pub fn overview(&self) -> Overview {
        let summary = self.alerts.summary();
        Overview {
            total_markets: self.registry.len(),
            active_markets: self.registry.active_count(),
            high_risk_markets: summary.high_risk,
            degraded_markets: summary.degraded,
            alerts_held: summary.alerts_held,
        }
    }
}

/// Run one periodic collection task per configured market until the output
/// channel closes.
pub async fn run_scheduler(
    engine: Arc<RiskEngine>,
    collector: Arc<dyn FactorCollector>,
    db: Option<SharedDatabase>,
    out: mpsc::UnboundedSender<PipelineOutput>,
    config: SchedulerConfig,
) {
    let ids: Vec<String> = engine.registry().iter().map(|m| m.id.clone()).collect();
    info!("Scheduler started for {} markets", ids.len());

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            tokio::spawn(run_market(
                Arc::clone(&engine),
                Arc::clone(&collector),
                db.clone(),
                out.clone(),
                config.clone(),
                id,
            ))
        })
        .collect();
    drop(out);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Market task ended abnormally: {e}");
        }
    }
    info!("Scheduler stopped");
}

async fn run_market(
    engine: Arc<RiskEngine>,
    collector: Arc<dyn FactorCollector>,
    db: Option<SharedDatabase>,
    out: mpsc::UnboundedSender<PipelineOutput>,
    config: SchedulerConfig,
    market_id: String,
) {
    let Some(market) = engine.registry().get(&market_id) else {
        return;
    };
    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles: u64 = 0;

    loop {
        interval.tick().await;
        if out.is_closed() {
            break;
        }
        let output = collect_and_run(&engine, collector.as_ref(), db.as_ref(), &config, market).await;
        cycles += 1;
        if cycles % 100 == 0 {
            info!(market = %market_id, "Completed {cycles} cycles");
        }
        if out.send(output).is_err() {
            break;
        }
    }
    debug!(market = %market_id, "Market task stopped after {cycles} cycles");
}

async fn collect_and_run(
    engine: &RiskEngine,
    collector: &dyn FactorCollector,
    db: Option<&SharedDatabase>,
    config: &SchedulerConfig,
    market: &Market,
) -> PipelineOutput {
    if !market.is_active() {
        return PipelineOutput::Skipped {
            market_id: market.id.clone(),
            reason: CycleError::InactiveMarket(market.id.clone()).to_string(),
        };
    }

    let timeout = Duration::from_millis(config.collect_timeout_ms);
    let set = match tokio::time::timeout(timeout, collector.collect(market)).await {
        Ok(set) => set,
        Err(_) => {
            let err = CycleError::CollectTimeout {
                market_id: market.id.clone(),
                timeout_ms: config.collect_timeout_ms,
            };
            warn!("{err}, skipping cycle");
            return PipelineOutput::Skipped {
                market_id: market.id.clone(),
                reason: err.to_string(),
            };
        }
    };

    match engine.run_cycle(&market.id, &set, Utc::now()) {
        Ok(report) => {
            if let Some(db) = db {
                persist(db, &report);
            }
            PipelineOutput::Cycle(report)
        }
        Err(CycleError::MissingMeasurement { market_id, domains }) => {
            PipelineOutput::Degraded { market_id, domains }
        }
        Err(e) => PipelineOutput::Skipped {
            market_id: market.id.clone(),
            reason: e.to_string(),
        },
    }
}

/// Storage failures are logged; the in-memory state is authoritative.
fn persist(db: &SharedDatabase, report: &CycleReport) {
    if let Err(e) = db.store_assessment(&report.assessment) {
        warn!(market = %report.assessment.market_id, "Failed to store assessment: {e}");
    }
    if let Observation::Transition { event, delivery } = &report.observation {
        let delivered = matches!(delivery, Delivery::Delivered(_));
        if let Err(e) = db.store_alert(event, delivered) {
            warn!(market = %event.market_id, id = event.id, "Failed to store alert: {e}");
        }
    }
}
