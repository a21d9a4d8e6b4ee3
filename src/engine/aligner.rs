use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::calendar::bucket_close;
use crate::types::{Candle, RawBar};

/// Aggregates raw bars into NSE-aligned 1h buckets (§4.A). Each bucket opens
/// one hour before its close, on the XX:15 boundary; a bucket with no
/// observations is never emitted.
#[derive(Debug, Default)]
pub struct CandleAligner {
    open: HashMap<DateTime<Utc>, Candle>,
}

impl CandleAligner {
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
        }
    }

    /// Feed one raw bar. Returns the candle that just closed, if this bar's
    /// arrival rolled the bucket over to the next one.
    pub fn ingest(&mut self, bar: &RawBar) -> Option<Candle> {
        let close_time = bucket_close(bar.timestamp);
        let open_time = close_time - chrono::Duration::hours(1);

        let mut rolled_off = None;
        let keys_to_close: Vec<_> = self
            .open
            .keys()
            .filter(|k| **k != close_time)
            .cloned()
            .collect();
        for k in keys_to_close {
            if let Some(mut c) = self.open.remove(&k) {
                c.is_closed = true;
                rolled_off = Some(c);
            }
        }

        let bucket = self.open.entry(close_time).or_insert_with(|| Candle {
            open_time,
            close_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            is_closed: false,
        });

        bucket.high = bucket.high.max(bar.high);
        bucket.low = bucket.low.min(bar.low);
        bucket.close = bar.close;
        bucket.volume = match (bucket.volume, bar.volume) {
            (Some(a), Some(b)) => Some(a + b),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        rolled_off
    }

    /// The still-forming bucket, if any, merged with a fresh last-traded
    /// price snapshot for trailing-stop evaluation between candle closes.
    pub fn forming_with_ltp(&self, ltp: Decimal) -> Option<Candle> {
        self.open.values().next().map(|c| {
            let mut merged = c.clone();
            merged.merge_ltp(ltp);
            merged
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use rust_decimal_macros::dec;

    fn ist_to_utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bar(ts: DateTime<Utc>, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> RawBar {
        RawBar {
            timestamp: ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: None,
        }
    }

    #[test]
    fn candle_closes_when_bucket_rolls_over() {
        let mut aligner = CandleAligner::new();
        let closed = aligner.ingest(&bar(
            ist_to_utc(2026, 7, 27, 9, 20),
            dec!(100),
            dec!(102),
            dec!(99),
            dec!(101),
        ));
        assert!(closed.is_none());

        let closed = aligner.ingest(&bar(
            ist_to_utc(2026, 7, 27, 10, 20),
            dec!(101),
            dec!(103),
            dec!(100),
            dec!(102),
        ));
        let closed = closed.expect("prior bucket should have closed");
        assert!(closed.is_closed);
        assert_eq!(closed.close_time, ist_to_utc(2026, 7, 27, 10, 15));
    }
}
