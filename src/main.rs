use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use chainmonitor::alerts::sink::{AlertSink, ChannelSink};
use chainmonitor::alerts::state::{Delivery, Observation};
use chainmonitor::config::Config;
use chainmonitor::core::collector::{FactorCollector, SnapshotFileCollector};
use chainmonitor::core::pipeline::{PipelineOutput, RiskEngine, run_scheduler};
use chainmonitor::db::SharedDatabase;
use chainmonitor::notifications::Notifier;

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = match "chainmonitor=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("ChainMonitor starting...");

    let config = Config::load("config.toml");
    tracing::debug!("Config: {:?}", config);
    if config.markets.is_empty() {
        tracing::error!("No markets configured, nothing to monitor");
        return;
    }

    let db = open_database(&config.database.path);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<PipelineOutput>();
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(ChannelSink::new(out_tx.clone()))];
    if config.notifications.enabled {
        sinks.push(Arc::new(Notifier::new(&config.notifications)));
    }

    let first_event_id = match db.as_ref().map(SharedDatabase::max_event_id) {
        Some(Ok(max)) => max + 1,
        Some(Err(e)) => {
            tracing::warn!("Failed to read last alert id: {e}, starting at 1");
            1
        }
        None => 1,
    };
    let engine = Arc::new(RiskEngine::from_config(&config, sinks).with_first_event_id(first_event_id));
    let collector: Arc<dyn FactorCollector> =
        Arc::new(SnapshotFileCollector::new(&config.collector.snapshot_path));
    tracing::info!(
        "Monitoring {} markets from {}",
        engine.registry().active_count(),
        config.collector.snapshot_path
    );

    let scheduler = tokio::spawn(run_scheduler(
        Arc::clone(&engine),
        collector,
        db,
        out_tx,
        config.scheduler.clone(),
    ));

    loop {
        tokio::select! {
            output = out_rx.recv() => match output {
                Some(output) => report(output),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    drop(out_rx);
    scheduler.abort();
    let overview = engine.overview();
    tracing::info!(
        "Stopped: {} markets, {} high risk, {} degraded, {} alerts held",
        overview.total_markets,
        overview.high_risk_markets,
        overview.degraded_markets,
        overview.alerts_held
    );
}

/// History is optional: without a database the engine still runs in memory.
fn open_database(path: &str) -> Option<SharedDatabase> {
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create database directory: {e}");
            return None;
        }
    }
    match SharedDatabase::open(db_path) {
        Ok(db) => {
            tracing::info!("Database opened at {path}");
            Some(db)
        }
        Err(e) => {
            tracing::warn!("Failed to open database {path}: {e}, history disabled");
            None
        }
    }
}

fn report(output: PipelineOutput) {
    match output {
        PipelineOutput::Cycle(report) => {
            let a = &report.assessment;
            match report.observation {
                Observation::Transition { event, delivery } => {
                    if let Delivery::Failed { errors, .. } = delivery {
                        tracing::warn!("Alert {} delivery failed on {} sinks", event.id, errors.len());
                    }
                }
                Observation::Suppressed { pending } => {
                    tracing::info!(market = %a.market_id, "Holding {} until dwell passes", pending);
                }
                Observation::Baseline | Observation::Unchanged => {}
            }
            tracing::info!(
                market = %a.market_id,
                "score {} ({}) dex {:.1} whale {:.1} cex {:.1}",
                a.risk_score,
                a.level,
                a.factors.dex.score,
                a.factors.whale.score,
                a.factors.cex.score
            );
        }
        PipelineOutput::Alert { event, kind } => {
            tracing::warn!(
                market = %event.market_id,
                "{} {:?}: {}",
                event.new_level.emoji(),
                kind,
                event.message
            );
        }
        PipelineOutput::Degraded { market_id, domains } => {
            tracing::warn!(market = %market_id, "Degraded, no data for {:?}", domains);
        }
        PipelineOutput::Skipped { market_id, reason } => {
            tracing::debug!(market = %market_id, "Skipped: {reason}");
        }
    }
}
