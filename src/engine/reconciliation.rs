use std::collections::HashSet;

use tracing::{info, warn};

use crate::broker::BrokerAdapter;
use crate::calendar::canonicalize_tradingsymbol;
use crate::events::{Event, EventBus};
use crate::types::OpenPosition;

/// Runs every `interval_seconds` (default 60s, §5): diffs broker-reported
/// positions against `activeMonitors` and publishes mismatch/success events.
/// Never mutates `OpenPosition` directly — only a read-only projection.
#[derive(Default)]
pub struct BrokerReconciliation {
    had_mismatch: bool,
}

impl BrokerReconciliation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_once<B: BrokerAdapter + ?Sized>(
        &mut self,
        broker: &B,
        active_monitors: &[OpenPosition],
        events: &EventBus,
    ) {
        let broker_positions = match broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "broker reconciliation: failed to fetch positions");
                return;
            }
        };

        let broker_symbols: HashSet<String> = broker_positions
            .iter()
            .filter(|p| p.qty_lots != 0)
            .map(|p| canonicalize_tradingsymbol(&p.tradingsymbol))
            .collect();
        let monitor_symbols: HashSet<String> = active_monitors
            .iter()
            .map(|p| canonicalize_tradingsymbol(&p.tradingsymbol))
            .collect();

        let mismatched: Vec<&String> = broker_symbols
            .symmetric_difference(&monitor_symbols)
            .collect();

        if !mismatched.is_empty() {
            self.had_mismatch = true;
            warn!(?mismatched, "position mismatch detected");
            events.publish(Event::PositionMismatchDetected {
                tradingsymbols: mismatched.into_iter().cloned().collect(),
            });
        } else if self.had_mismatch {
            info!("broker positions reconciled with active monitors");
            events.publish(Event::PositionReconciliationSuccess);
            self.had_mismatch = false;
        }
    }
}
