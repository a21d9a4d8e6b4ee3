use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::option::Side;

/// An inside bar detected against its mother candle (§4.B): `range_high`/
/// `range_low` are the mother candle's high/low, the breakout thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsideBar {
    pub mother_open_time: DateTime<Utc>,
    pub inside_open_time: DateTime<Utc>,
    pub range_high: Decimal,
    pub range_low: Decimal,
}

/// A candle close breaching the inside-bar range (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutEvent {
    pub direction: Side,
    pub candle_time: DateTime<Utc>,
    pub close_price: Decimal,
    pub range_high: Decimal,
    pub range_low: Decimal,
}

/// Lifecycle state of a signal (§4.D). A signal starts `Armed` once an inside
/// bar is detected, becomes `Consumed` once a trade is taken on its breakout,
/// or `MissedExpired` once the missed-trade grace window lapses unconsumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    Armed,
    Consumed,
    MissedExpired,
}

/// A unique identity for a signal, used to suppress duplicate re-arming of
/// the same inside-bar/breakout pair (§4.D).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFingerprint {
    pub direction: Side,
    pub strike: i64,
    pub range_high: String,
    pub range_low: String,
    pub breakout_candle_time: DateTime<Utc>,
}

impl SignalFingerprint {
    pub fn new(
        direction: Side,
        strike: i64,
        range_high: Decimal,
        range_low: Decimal,
        breakout_candle_time: DateTime<Utc>,
    ) -> Self {
        Self {
            direction,
            strike,
            range_high: range_high.to_string(),
            range_low: range_low.to_string(),
            breakout_candle_time: breakout_candle_time
                .with_timezone(&Utc)
                .trunc_subsecs(0),
        }
    }
}

/// An armed or resolved signal tracked by the state machine (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSignal {
    pub inside_bar: InsideBar,
    pub state: SignalState,
    pub armed_at: DateTime<Utc>,
    pub breakout: Option<BreakoutEvent>,
    pub fingerprint: Option<SignalFingerprint>,
}

impl ActiveSignal {
    pub fn armed(inside_bar: InsideBar, armed_at: DateTime<Utc>) -> Self {
        Self {
            inside_bar,
            state: SignalState::Armed,
            armed_at,
            breakout: None,
            fingerprint: None,
        }
    }

    /// Transition to `Consumed` on trade entry, recording the fingerprint
    /// that guards against re-arming the same breakout (§4.D).
    pub fn consume(&mut self, breakout: BreakoutEvent, strike: i64) {
        let fp = SignalFingerprint::new(
            breakout.direction,
            strike,
            breakout.range_high,
            breakout.range_low,
            breakout.candle_time,
        );
        self.breakout = Some(breakout);
        self.fingerprint = Some(fp);
        self.state = SignalState::Consumed;
    }

    /// Transition to `MissedExpired` once the missed-trade grace window has
    /// lapsed without a trade being taken (§4.C `missed_grace_seconds`).
    pub fn expire_missed(&mut self) {
        self.state = SignalState::MissedExpired;
    }
}
