use chrono::{DateTime, Utc};

use crate::types::{BreakoutEvent, Candle, InsideBar, Side};

/// Scan-all mode (§4.B, backtest): every index `i >= 2` such that `c[i-1]` is
/// the inside bar of parent `c[i-2]`. The returned index is the post-inside-
/// bar position, ready to start a breakout scan from.
pub fn detect_inside_bars_scan_all(candles: &[Candle]) -> Vec<(usize, InsideBar)> {
    let mut out = Vec::new();
    for i in 2..candles.len() {
        let parent = &candles[i - 2];
        let child = &candles[i - 1];
        if child.high < parent.high && child.low > parent.low {
            out.push((
                i,
                InsideBar {
                    mother_open_time: parent.open_time,
                    inside_open_time: child.open_time,
                    range_high: parent.high,
                    range_low: parent.low,
                },
            ));
        }
    }
    out
}

/// Latest-active mode (§4.B, live): scan from most recent backward, return
/// the first inside-bar occurrence.
pub fn detect_latest_active_inside_bar(candles: &[Candle]) -> Option<(usize, InsideBar)> {
    if candles.len() < 2 {
        return None;
    }
    for i in (2..=candles.len()).rev() {
        let parent = &candles[i - 2];
        let child = &candles[i - 1];
        if child.high < parent.high && child.low > parent.low {
            return Some((
                i,
                InsideBar {
                    mother_open_time: parent.open_time,
                    inside_open_time: child.open_time,
                    range_high: parent.high,
                    range_low: parent.low,
                },
            ));
        }
    }
    None
}

/// Scans `candles` from `start_idx` by timestamp (not index position) for
/// the first candle whose close breaches `(range_low, range_high)` (§4.C).
pub fn check_breakout(
    candles: &[Candle],
    range_high: rust_decimal::Decimal,
    range_low: rust_decimal::Decimal,
    inside_bar_time: DateTime<Utc>,
) -> Option<BreakoutEvent> {
    let mut ordered: Vec<&Candle> = candles
        .iter()
        .filter(|c| c.open_time > inside_bar_time)
        .collect();
    ordered.sort_by_key(|c| c.open_time);

    for candle in ordered {
        if candle.close > range_high {
            return Some(BreakoutEvent {
                direction: Side::Ce,
                candle_time: candle.close_time,
                close_price: candle.close,
                range_high,
                range_low,
            });
        }
        if candle.close < range_low {
            return Some(BreakoutEvent {
                direction: Side::Pe,
                candle_time: candle.close_time,
                close_price: candle.close,
                range_high,
                range_low,
            });
        }
    }
    None
}

/// True iff a detected breakout is too stale to act on (§4.C "missed-trade"
/// classification): the breakout candle closed more than `grace_seconds`
/// before `now`.
pub fn is_missed(breakout: &BreakoutEvent, now: DateTime<Utc>, grace_seconds: u64) -> bool {
    let age = now.signed_duration_since(breakout.candle_time);
    age.num_seconds() > grace_seconds as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(open_time: DateTime<Utc>, o: i64, h: i64, l: i64, c: i64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + chrono::Duration::hours(1),
            open: dec!(0) + rust_decimal::Decimal::from(o),
            high: rust_decimal::Decimal::from(h),
            low: rust_decimal::Decimal::from(l),
            close: rust_decimal::Decimal::from(c),
            volume: None,
            is_closed: true,
        }
    }

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, h, 15, 0).unwrap()
    }

    #[test]
    fn scan_all_finds_contained_child() {
        let candles = vec![
            candle(t(9), 100, 110, 90, 105),
            candle(t(10), 105, 108, 95, 103),
            candle(t(11), 103, 109, 94, 108),
        ];
        let found = detect_inside_bars_scan_all(&candles);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 2);
        assert_eq!(found[0].1.range_high, dec!(110));
        assert_eq!(found[0].1.range_low, dec!(90));
    }

    #[test]
    fn equal_high_does_not_qualify_as_inside() {
        let candles = vec![
            candle(t(9), 100, 110, 90, 105),
            candle(t(10), 105, 110, 95, 103),
        ];
        assert!(detect_inside_bars_scan_all(&candles).is_empty());
    }

    #[test]
    fn breakout_scans_by_timestamp_not_index() {
        let inside_bar_time = t(10);
        let candles = vec![candle(t(11), 103, 112, 102, 111)];
        let event = check_breakout(&candles, dec!(110), dec!(90), inside_bar_time).unwrap();
        assert_eq!(event.direction, Side::Ce);
        assert_eq!(event.close_price, dec!(111));
    }

    #[test]
    fn stale_breakout_is_classified_missed() {
        let event = BreakoutEvent {
            direction: Side::Ce,
            candle_time: t(10),
            close_price: dec!(111),
            range_high: dec!(110),
            range_low: dec!(90),
        };
        let now = t(10) + chrono::Duration::seconds(301);
        assert!(is_missed(&event, now, 300));
    }
}
