use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

/// The event contract (§6.5). Each event is published with its own
/// `timestamp`, captured at `publish()` time.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "trade_executed")]
    TradeExecuted {
        order_id: String,
        tradingsymbol: String,
        entry: Decimal,
    },
    #[serde(rename = "position_closed")]
    PositionClosed {
        order_id: String,
        exit_price: Decimal,
        pnl: Decimal,
        reason: String,
    },
    #[serde(rename = "position_mismatch_detected")]
    PositionMismatchDetected { tradingsymbols: Vec<String> },
    #[serde(rename = "position_reconciliation_success")]
    PositionReconciliationSuccess,
    #[serde(rename = "daily_loss_breached")]
    DailyLossBreached { daily_pnl: Decimal, limit_pct: Decimal },
    #[serde(rename = "state_changed")]
    StateChanged { path: String },
    #[serde(rename = "state_stale")]
    StateStale { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

/// Queue-and-drain event dispatch (§9 redesign note): `publish` enqueues
/// under a short, non-blocking send; a dedicated dispatch task drains the
/// queue and fans out to subscribers, so publishers never hold a lock while
/// calling into subscriber code.
pub struct EventBus {
    queue_tx: mpsc::UnboundedSender<EventEnvelope>,
    subscribe_tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<EventEnvelope>();
        let (subscribe_tx, _) = broadcast::channel(256);
        let dispatch_tx = subscribe_tx.clone();

        tokio::spawn(async move {
            while let Some(envelope) = queue_rx.recv().await {
                let _ = dispatch_tx.send(envelope);
            }
        });

        Self {
            queue_tx,
            subscribe_tx,
        }
    }

    pub fn publish(&self, event: Event) {
        let envelope = EventEnvelope {
            event,
            timestamp: Utc::now(),
        };
        // An unbounded send never blocks; a closed dispatch task (only on
        // shutdown) is not an error worth propagating.
        let _ = self.queue_tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.subscribe_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_event_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::PositionReconciliationSuccess);

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, Event::PositionReconciliationSuccess));
    }
}
