use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    #[default]
    DexPool,
    Whale,
    Exchange,
}

/// A monitored market. Everything but the active flag is fixed at startup.
#[derive(Debug)]
pub struct Market {
    pub id: String,
    pub label: String,
    pub kind: MarketKind,
    pub address: Option<String>,
    pub description: Option<String>,
    active: AtomicBool,
}

impl Market {
    pub fn new(id: &str, label: &str, kind: MarketKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            address: None,
            description: None,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

impl From<&MarketConfig> for Market {
    fn from(config: &MarketConfig) -> Self {
        Self {
            id: config.id.clone(),
            label: if config.label.is_empty() {
                config.id.clone()
            } else {
                config.label.clone()
            },
            kind: config.kind,
            address: config.address.clone(),
            description: config.description.clone(),
            active: AtomicBool::new(config.active),
        }
    }
}

/// Fixed set of markets, keyed by id. Insertion order is kept for display.
#[derive(Debug, Default)]
pub struct MarketRegistry {
    markets: HashMap<String, Market>,
    order: Vec<String>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[MarketConfig]) -> Self {
        configs.iter().map(Market::from).fold(Self::new(), Self::with)
    }

    /// Add a market. A repeated id replaces the earlier entry.
    pub fn with(mut self, market: Market) -> Self {
        if !self.markets.contains_key(&market.id) {
            self.order.push(market.id.clone());
        }
        self.markets.insert(market.id.clone(), market);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Market> {
        self.markets.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.order.iter().filter_map(|id| self.markets.get(id))
    }

    pub fn active(&self) -> impl Iterator<Item = &Market> {
        self.iter().filter(|m| m.is_active())
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Returns false when the id is unknown.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        match self.markets.get(id) {
            Some(market) => {
                market.set_active(active);
                true
            }
            None => false,
        }
    }
}
