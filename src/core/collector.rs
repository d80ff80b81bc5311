use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::MeasurementSet;
use super::market::Market;

/// Source of raw factor measurements for one market.
///
/// A domain that could not be measured is left as `None`; the engine then
/// refuses to score the cycle.
#[async_trait]
pub trait FactorCollector: Send + Sync {
    async fn collect(&self, market: &Market) -> MeasurementSet;
}

/// Reads a JSON object of `market id -> measurement set` on every call.
///
/// Lets an external indexer drop its latest numbers into a file without
/// linking against this crate.
pub struct SnapshotFileCollector {
    path: PathBuf,
}

impl SnapshotFileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FactorCollector for SnapshotFileCollector {
    async fn collect(&self, market: &Market) -> MeasurementSet {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Snapshot {} unreadable: {e}", self.path.display());
                return MeasurementSet::default();
            }
        };
        let mut snapshot: HashMap<String, MeasurementSet> = match serde_json::from_str(&contents) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to parse snapshot {}: {e}", self.path.display());
                return MeasurementSet::default();
            }
        };
        snapshot.remove(&market.id).unwrap_or_default()
    }
}

/// In-memory measurements, replaced wholesale by the caller.
#[derive(Default)]
pub struct StaticCollector {
    sets: Mutex<HashMap<String, MeasurementSet>>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, market_id: &str, set: MeasurementSet) {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(market_id.to_string(), set);
    }
}

#[async_trait]
impl FactorCollector for StaticCollector {
    async fn collect(&self, market: &Market) -> MeasurementSet {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&market.id)
            .cloned()
            .unwrap_or_default()
    }
}
