use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::option::{OptionContract, Side, Underlying, Strike};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A live option position under monitoring (§3, §4.G).
///
/// Invariants (enforced by the constructors and mutators below, never by
/// callers reaching into the fields directly):
/// - `0 <= remaining_qty_lots <= total_qty_lots`
/// - `status == Closed` iff `remaining_qty_lots == 0`
/// - `stop_loss` only ever moves in the position's favor (monotone trail)
/// - `remaining_qty_lots` is owned exclusively by the Position Monitor; it is
///   only mutated after a confirmed broker fill, never speculatively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub order_id: String,
    pub tradingsymbol: String,
    pub underlying: Underlying,
    pub strike: Strike,
    pub side: Side,
    pub expiry: chrono::NaiveDate,
    pub entry_price: Decimal,
    pub total_qty_lots: u32,
    pub remaining_qty_lots: u32,
    pub lot_size: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub trail_anchor: Decimal,
    pub book1_done: bool,
    pub book2_done: bool,
    pub be_locked: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub realized_pnl: Decimal,
    /// Sum of `exit_price * lots_closed` across partial/full exit fills, used
    /// to compute the volume-weighted exit price once the position closes.
    exit_value_accum: Decimal,
}

impl OpenPosition {
    pub fn open(
        contract: &OptionContract,
        order_id: String,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        total_qty_lots: u32,
        lot_size: u32,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            tradingsymbol: contract.tradingsymbol.clone(),
            underlying: contract.underlying,
            strike: contract.strike,
            side: contract.side,
            expiry: contract.expiry,
            entry_price,
            total_qty_lots,
            remaining_qty_lots: total_qty_lots,
            lot_size,
            stop_loss,
            take_profit,
            trail_anchor: entry_price,
            book1_done: false,
            book2_done: false,
            be_locked: false,
            opened_at,
            closed_at: None,
            status: PositionStatus::Open,
            realized_pnl: Decimal::ZERO,
            exit_value_accum: Decimal::ZERO,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_qty_lots == 0
    }

    /// Raise the stop-loss if `candidate` is an improvement; monotone by
    /// construction (§4.G trailing rule never allows the SL to retreat).
    pub fn raise_stop_loss(&mut self, candidate: Decimal) {
        if candidate > self.stop_loss {
            self.stop_loss = candidate;
        }
    }

    /// Record a confirmed partial/full exit fill: accrues realized PnL,
    /// reduces the remainder, and closes the position once it hits zero
    /// (§4.G step 9, invariant #6).
    pub fn record_exit_fill(&mut self, exit_price: Decimal, lots_closed: u32, closed_at: DateTime<Utc>) {
        let qty = Decimal::from(lots_closed) * Decimal::from(self.lot_size);
        self.realized_pnl += (exit_price - self.entry_price) * qty;
        self.exit_value_accum += exit_price * Decimal::from(lots_closed);
        self.remaining_qty_lots = self.remaining_qty_lots.saturating_sub(lots_closed);
        if self.remaining_qty_lots == 0 {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(closed_at);
        }
    }

    /// Volume-weighted exit price across all booking fills so far.
    pub fn vwap_exit_price(&self) -> Option<Decimal> {
        let closed_lots = self.total_qty_lots - self.remaining_qty_lots;
        if closed_lots == 0 {
            None
        } else {
            Some(self.exit_value_accum / Decimal::from(closed_lots))
        }
    }
}
