use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Asia::Kolkata;

/// NSE cash/derivatives session: 09:15-15:30 IST, Monday-Friday (§4.A, §4.K).
/// Holiday calendars are out of scope (§1 Non-goals do not mention them, but
/// the source venue observes a fixed list elsewhere); weekday-only here.
pub fn is_trading_day(ts: DateTime<Utc>) -> bool {
    use chrono::Weekday;
    let ist = ts.with_timezone(&Kolkata);
    !matches!(ist.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_market_hours(ts: DateTime<Utc>) -> bool {
    if !is_trading_day(ts) {
        return false;
    }
    let ist = ts.with_timezone(&Kolkata);
    let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    let t = ist.time();
    t >= open && t < close
}

/// 1h NSE candle buckets open and close on the XX:15 boundary (§4.A):
/// 09:15-10:15, 10:15-11:15, ..., 14:15-15:15. Given any IST instant, returns
/// the close time of the bucket it falls in.
pub fn bucket_close(ts: DateTime<Utc>) -> DateTime<Utc> {
    let ist = ts.with_timezone(&Kolkata);
    let minutes_since_midnight = ist.hour() as i64 * 60 + ist.minute() as i64;
    // Buckets are anchored at :15 past the hour; a timestamp at or before
    // XX:15 belongs to the bucket closing at XX:15.
    let anchor_minutes = minutes_since_midnight - 15;
    let bucket_index = if anchor_minutes < 0 {
        -1
    } else {
        anchor_minutes / 60
    };
    let close_minutes = (bucket_index + 1) * 60 + 15;
    let close_hour = close_minutes / 60;
    let close_minute = close_minutes % 60;
    let close_naive = ist
        .date_naive()
        .and_hms_opt(close_hour as u32 % 24, close_minute as u32, 0)
        .unwrap();
    Kolkata
        .from_local_datetime(&close_naive)
        .single()
        .unwrap_or(ist)
        .with_timezone(&Utc)
}

/// Normalizes a broker-reported option tradingsymbol to the canonical
/// `{SYMBOL}{DDMMMYY}{STRIKE}{CE|PE}` form so that positions reported by
/// different brokers/feeds can be compared for equality (§4.K), grounded on
/// the source venue's symbol canonicalizer.
pub fn canonicalize_tradingsymbol(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let (side, body) = if let Some(stripped) = upper.strip_suffix("CE") {
        ("CE", stripped)
    } else if let Some(stripped) = upper.strip_suffix("PE") {
        ("PE", stripped)
    } else {
        return upper;
    };

    let digits_start = body
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let (prefix, strike) = match digits_start {
        Some(i) => (&body[..i], &body[i..]),
        None => (body, ""),
    };

    format!("{}{}{}", prefix, strike, side)
}

pub fn tradingsymbols_equal(a: &str, b: &str) -> bool {
    canonicalize_tradingsymbol(a) == canonicalize_tradingsymbol(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist_to_utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn bucket_close_aligns_to_quarter_past() {
        let ts = ist_to_utc(2026, 7, 27, 10, 40);
        let close = bucket_close(ts);
        assert_eq!(close, ist_to_utc(2026, 7, 27, 11, 15));
    }

    #[test]
    fn bucket_close_first_bucket_of_day() {
        let ts = ist_to_utc(2026, 7, 27, 9, 20);
        let close = bucket_close(ts);
        assert_eq!(close, ist_to_utc(2026, 7, 27, 10, 15));
    }

    #[test]
    fn weekend_is_not_a_trading_day() {
        let saturday = ist_to_utc(2026, 8, 1, 10, 0);
        assert!(!is_trading_day(saturday));
    }

    #[test]
    fn canonicalizes_prefixed_and_suffixed_symbols() {
        let a = "nifty27jul2624800ce";
        let b = "  NIFTY27JUL2624800CE  ";
        assert!(tradingsymbols_equal(a, b));
        assert!(!tradingsymbols_equal(a, "NIFTY27JUL2624900CE"));
    }

    #[test]
    fn market_hours_close_is_exclusive() {
        let ts = ist_to_utc(2026, 7, 27, 15, 30);
        assert!(!is_market_hours(ts));
        let ts = ist_to_utc(2026, 7, 27, 15, 29);
        assert!(is_market_hours(ts));
    }
}
