use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Nominative interval of a raw bar, before alignment (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawInterval {
    M1,
    M15,
    H1,
}

impl RawInterval {
    pub fn as_minutes(&self) -> i64 {
        match self {
            RawInterval::M1 => 1,
            RawInterval::M15 => 15,
            RawInterval::H1 => 60,
        }
    }
}

/// A raw OHLC bar as received from a market-data adapter, before NSE alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
}

/// An NSE-aligned 1h candle (§3, §4.A). Buckets open at XX:15 and close at
/// (XX+1):15 IST; aggregation drops buckets with no observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
    pub is_closed: bool,
}

impl Candle {
    /// True iff `close_time <= now` (§4.A completeness policy).
    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Merge a last-traded-price snapshot into this (forming) bar: raise high,
    /// lower low, set close to the ltp (§4.A "snapshot merge").
    pub fn merge_ltp(&mut self, ltp: Decimal) {
        self.high = self.high.max(ltp);
        self.low = self.low.min(ltp);
        self.close = ltp;
    }
}

/// A bounded, time-ordered window of aligned candles kept for pattern
/// detection. Oldest candles fall off the front once `max_size` is reached.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
    pub max_size: usize,
}

impl CandleSeries {
    pub fn new(max_size: usize) -> Self {
        Self {
            candles: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() >= self.max_size {
            self.candles.remove(0);
        }
        self.candles.push(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Only the complete candles, in time order — what the Detector and
    /// Breakout Checker are allowed to see (§9 open question: forming bar is
    /// never passed to either).
    pub fn closed(&self) -> Vec<&Candle> {
        self.candles.iter().filter(|c| c.is_closed).collect()
    }
}
