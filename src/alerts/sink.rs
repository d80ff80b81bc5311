use tokio::sync::mpsc;

use super::{AlertEvent, NotificationKind};
use crate::core::pipeline::PipelineOutput;
use crate::error::SinkError;

/// Receives alert events that qualified for delivery.
///
/// Called while the market's state is locked, so implementations must not
/// block; hand slow work off to another thread. Retrying is the sink's own
/// business. The event is already recorded when `deliver` runs.
///
/// `Ok` means the sink accepted the event, not that anything was shown: a
/// sink may drop it by its own policy (cooldown, disabled). The persisted
/// `delivered` flag carries the same meaning.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, event: &AlertEvent, kind: NotificationKind) -> Result<(), SinkError>;
}

/// Pushes alerts onto the pipeline output channel for the presentation layer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineOutput>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineOutput>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn deliver(&self, event: &AlertEvent, kind: NotificationKind) -> Result<(), SinkError> {
        self.tx
            .send(PipelineOutput::Alert {
                event: event.clone(),
                kind,
            })
            .map_err(|_| SinkError::Closed(self.name()))
    }
}
