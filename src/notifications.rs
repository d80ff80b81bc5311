use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::alerts::sink::AlertSink;
use crate::alerts::{AlertEvent, NotificationKind};
use crate::config::NotificationConfig;
use crate::error::SinkError;

/// Desktop notification sink with a per-market cooldown to prevent spam.
pub struct Notifier {
    enabled: bool,
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            cooldown: Duration::from_secs(config.cooldown_seconds),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Check and update the market's cooldown. Returns true if enough time has passed.
    fn check_cooldown(&self, market_id: &str) -> bool {
        let mut last = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(prev) = last.get(market_id) {
            if now.duration_since(*prev) < self.cooldown {
                return false;
            }
        }
        last.insert(market_id.to_string(), now);
        true
    }

    fn title(event: &AlertEvent, kind: NotificationKind) -> String {
        match kind {
            NotificationKind::Danger => format!(
                "{} {} risk: {}",
                event.new_level.emoji(),
                event.market_label,
                event.new_level
            ),
            NotificationKind::Resolved => format!("{} risk eased", event.market_label),
        }
    }

    /// Fire-and-forget: send the actual desktop notification.
    fn send_notification(&self, event: &AlertEvent, kind: NotificationKind) {
        let title = Self::title(event, kind);
        let body = format!("{} | {}", event.message, event.new_level.description());

        // Background thread so the market's state lock is never held on D-Bus
        std::thread::spawn(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .show()
            {
                tracing::debug!("Desktop notification failed: {e}");
            }
        });
    }
}

impl AlertSink for Notifier {
    fn name(&self) -> &'static str {
        "desktop"
    }

    /// Disabled and cooled-down deliveries are skips, not failures.
    fn deliver(&self, event: &AlertEvent, kind: NotificationKind) -> Result<(), SinkError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.check_cooldown(&event.market_id) {
            tracing::debug!(market = %event.market_id, id = event.id, "Notification in cooldown");
            return Ok(());
        }
        self.send_notification(event, kind);
        Ok(())
    }
}
