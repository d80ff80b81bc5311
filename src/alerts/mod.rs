//! Alert events, delivery gating and the per-market state machine.

pub mod sink;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{RiskLevel, RiskScore};

/// Delivery preferences for one market (or the global default).
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct AlertConfig {
    /// Lowest level that is delivered on an upward transition.
    pub threshold: RiskLevel,
    pub enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: RiskLevel::Warning,
            enabled: true,
        }
    }
}

/// What happens to a transition that lowers the risk level.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownwardPolicy {
    /// Recorded in history, never delivered.
    #[default]
    RecordOnly,
    /// Delivered as `NotificationKind::Resolved` when leaving a level at or
    /// above the market's threshold.
    NotifyResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Danger,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn between(previous: RiskLevel, new: RiskLevel) -> Option<Self> {
        match new.cmp(&previous) {
            std::cmp::Ordering::Greater => Some(Direction::Up),
            std::cmp::Ordering::Less => Some(Direction::Down),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Immutable record of one level transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Process-wide, increasing in emission order.
    pub id: u64,
    pub market_id: String,
    pub market_label: String,
    pub timestamp: DateTime<Utc>,
    pub previous_level: RiskLevel,
    pub new_level: RiskLevel,
    pub triggering_score: RiskScore,
    pub message: String,
}

impl AlertEvent {
    pub fn is_escalation(&self) -> bool {
        self.new_level > self.previous_level
    }
}

/// Decide whether (and how) a recorded transition is delivered.
pub fn delivery_kind(
    previous: RiskLevel,
    new: RiskLevel,
    config: &AlertConfig,
    policy: DownwardPolicy,
) -> Option<NotificationKind> {
    if !config.enabled {
        return None;
    }
    match Direction::between(previous, new)? {
        Direction::Up if new >= config.threshold => Some(NotificationKind::Danger),
        Direction::Up => None,
        Direction::Down => match policy {
            DownwardPolicy::NotifyResolved if previous >= config.threshold => {
                Some(NotificationKind::Resolved)
            }
            _ => None,
        },
    }
}

pub fn transition_message(previous: RiskLevel, new: RiskLevel, score: RiskScore) -> String {
    if new > previous {
        format!("Risk level elevated to {new} from {previous} (score {score})")
    } else {
        format!("Risk level eased to {new} from {previous} (score {score})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARN_ON: AlertConfig = AlertConfig {
        threshold: RiskLevel::Warning,
        enabled: true,
    };

    #[test]
    fn upward_at_threshold_delivered() {
        assert_eq!(
            delivery_kind(RiskLevel::Caution, RiskLevel::Warning, &WARN_ON, DownwardPolicy::RecordOnly),
            Some(NotificationKind::Danger)
        );
        assert_eq!(
            delivery_kind(RiskLevel::Normal, RiskLevel::Critical, &WARN_ON, DownwardPolicy::RecordOnly),
            Some(NotificationKind::Danger)
        );
    }

    #[test]
    fn upward_below_threshold_not_delivered() {
        assert_eq!(
            delivery_kind(RiskLevel::Normal, RiskLevel::Caution, &WARN_ON, DownwardPolicy::RecordOnly),
            None
        );
    }

    #[test]
    fn disabled_never_delivers() {
        let config = AlertConfig {
            threshold: RiskLevel::Normal,
            enabled: false,
        };
        for previous in RiskLevel::ALL {
            for new in RiskLevel::ALL {
                for policy in [DownwardPolicy::RecordOnly, DownwardPolicy::NotifyResolved] {
                    assert_eq!(delivery_kind(previous, new, &config, policy), None);
                }
            }
        }
    }

    #[test]
    fn downward_never_danger() {
        for previous in RiskLevel::ALL {
            for new in RiskLevel::ALL.into_iter().filter(|n| *n < previous) {
                for policy in [DownwardPolicy::RecordOnly, DownwardPolicy::NotifyResolved] {
                    assert_ne!(
                        delivery_kind(previous, new, &WARN_ON, policy),
                        Some(NotificationKind::Danger)
                    );
                }
            }
        }
    }

    #[test]
    fn downward_record_only() {
        assert_eq!(
            delivery_kind(RiskLevel::Critical, RiskLevel::Normal, &WARN_ON, DownwardPolicy::RecordOnly),
            None
        );
    }

    #[test]
    fn downward_notify_resolved_from_alerting_level() {
        assert_eq!(
            delivery_kind(RiskLevel::Warning, RiskLevel::Caution, &WARN_ON, DownwardPolicy::NotifyResolved),
            Some(NotificationKind::Resolved)
        );
        // Never reached the threshold, nothing to resolve.
        assert_eq!(
            delivery_kind(RiskLevel::Caution, RiskLevel::Normal, &WARN_ON, DownwardPolicy::NotifyResolved),
            None
        );
    }

    #[test]
    fn same_level_never_delivered() {
        assert_eq!(
            delivery_kind(RiskLevel::Warning, RiskLevel::Warning, &WARN_ON, DownwardPolicy::NotifyResolved),
            None
        );
    }

    #[test]
    fn direction_helpers() {
        assert_eq!(Direction::between(RiskLevel::Normal, RiskLevel::Caution), Some(Direction::Up));
        assert_eq!(Direction::between(RiskLevel::Critical, RiskLevel::Caution), Some(Direction::Down));
        assert_eq!(Direction::between(RiskLevel::Warning, RiskLevel::Warning), None);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }

    #[test]
    fn messages_name_levels() {
        let up = transition_message(RiskLevel::Caution, RiskLevel::Warning, RiskScore::new(62.0));
        assert_eq!(up, "Risk level elevated to WARNING from CAUTION (score 62.0)");
        let down = transition_message(RiskLevel::Critical, RiskLevel::Normal, RiskScore::new(8.0));
        assert!(down.starts_with("Risk level eased to NORMAL"));
    }

    #[test]
    fn alert_config_parses_from_toml() {
        let config: AlertConfig = toml::from_str("threshold = 1\nenabled = false").unwrap();
        assert_eq!(config.threshold, RiskLevel::Caution);
        assert!(!config.enabled);
    }
}
