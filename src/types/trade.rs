use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::option::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Why a position was entered, recorded alongside the trade for later
/// analysis (§6.4 `pre_reason`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    InsideBarBreakout,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::InsideBarBreakout => "inside_bar_breakout",
        }
    }
}

/// Why a position was exited (§6.4 `post_outcome`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    StopLoss,
    TakeProfit,
    Tier1Booked,
    Tier2Booked,
    TrailingStop,
    BreakEven,
    ExpiryBlackout,
    ManualDisarm,
    DataExhausted,
}

impl ExitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitOutcome::StopLoss => "stop_loss",
            ExitOutcome::TakeProfit => "take_profit",
            ExitOutcome::Tier1Booked => "tier1_booked",
            ExitOutcome::Tier2Booked => "tier2_booked",
            ExitOutcome::TrailingStop => "trailing_stop",
            ExitOutcome::BreakEven => "break_even",
            ExitOutcome::ExpiryBlackout => "expiry_blackout",
            ExitOutcome::ManualDisarm => "manual_disarm",
            ExitOutcome::DataExhausted => "data_exhausted",
        }
    }
}

/// A single journal row (§3, §6.4). Column order on persistence must match
/// the struct field order exactly: timestamp, symbol, tradingsymbol, strike,
/// direction, order_id, entry, sl, tp, exit, pnl, status, pre_reason,
/// post_outcome, quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub tradingsymbol: String,
    pub strike: i64,
    pub direction: Side,
    pub order_id: String,
    pub entry: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub exit: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub status: TradeStatus,
    pub pre_reason: EntryReason,
    pub post_outcome: Option<ExitOutcome>,
    pub quantity: u32,
}

impl TradeRecord {
    pub fn pnl_per_lot(&self, lot_size: u32) -> Option<Decimal> {
        self.pnl.map(|p| p / Decimal::from(lot_size.max(1)))
    }
}
