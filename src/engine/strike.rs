use rust_decimal::Decimal;

use crate::types::{Moneyness, Side, Strike, Underlying};

/// §4.E Strike Resolver: ATM/ITM/OTM resolution on the underlying's grid.
pub fn resolve_strike(
    spot: Decimal,
    side: Side,
    moneyness: Moneyness,
    underlying: Underlying,
) -> Strike {
    let step = underlying.strike_step();
    let base = round_to_step(spot, step);

    let (offset, direction) = match moneyness {
        Moneyness::Atm => return Strike(base),
        Moneyness::Itm(n) => (n, 1),
        Moneyness::Otm(n) => (n, -1),
    };
    if offset == 0 {
        return Strike(base);
    }
    let delta = step * Decimal::from(offset);
    let signed = match (side, direction) {
        (Side::Ce, 1) => -delta,
        (Side::Ce, -1) => delta,
        (Side::Pe, 1) => delta,
        (Side::Pe, -1) => -delta,
        _ => unreachable!(),
    };
    Strike(base + decimal_to_i64(signed))
}

fn round_to_step(spot: Decimal, step: Decimal) -> i64 {
    let ratio = (spot / step).round();
    decimal_to_i64(ratio * step)
}

fn decimal_to_i64(d: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_i64().unwrap_or(0)
}

/// Backtest nearest-listed fallback (§4.E): choose the listed strike
/// minimizing `|listed - requested|`; ties broken by the first in iteration
/// order (callers should pass strikes pre-sorted if determinism matters).
pub fn nearest_listed_strike(requested: Strike, listed: &[Strike]) -> Option<Strike> {
    if listed.iter().any(|s| s.0 == requested.0) {
        return Some(requested);
    }
    listed
        .iter()
        .min_by_key(|s| (s.0 - requested.0).abs())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn atm_rounds_to_nearest_step() {
        let strike = resolve_strike(dec!(24830), Side::Ce, Moneyness::Atm, Underlying::Nifty);
        assert_eq!(strike.0, 24850);
    }

    #[test]
    fn ce_itm_subtracts_offset() {
        let strike = resolve_strike(dec!(24800), Side::Ce, Moneyness::Itm(2), Underlying::Nifty);
        assert_eq!(strike.0, 24700);
    }

    #[test]
    fn pe_itm_adds_offset() {
        let strike = resolve_strike(dec!(24800), Side::Pe, Moneyness::Itm(2), Underlying::Nifty);
        assert_eq!(strike.0, 24900);
    }

    #[test]
    fn nearest_listed_fallback_picks_closest() {
        let listed = vec![Strike(24700), Strike(24750), Strike(24900)];
        let picked = nearest_listed_strike(Strike(24800), &listed).unwrap();
        assert_eq!(picked.0, 24750);
    }
}
