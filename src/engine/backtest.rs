use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::StrategySettings;
use crate::engine::results::{BacktestResults, MetricsAccumulator};
use crate::engine::signal::{check_breakout, detect_inside_bars_scan_all};
use crate::engine::strike::{nearest_listed_strike, resolve_strike};
use crate::types::{
    Candle, EntryReason, ExitOutcome, Moneyness, OpenPosition, Side, Strike, TradeRecord,
    TradeStatus, Underlying,
};

/// Per-(expiry, strike, side) 1h option OHLC, keyed for §4.H step 5's chain
/// lookup. Absent when the backtest runs the synthetic premium path.
#[derive(Debug, Default)]
pub struct OptionChain {
    bars: HashMap<(NaiveDate, i64, &'static str), Vec<Candle>>,
}

impl OptionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, expiry: NaiveDate, strike: Strike, side: Side, mut bars: Vec<Candle>) {
        bars.sort_by_key(|c| c.open_time);
        self.bars.insert((expiry, strike.0, side.as_str()), bars);
    }

    pub fn bars_for(&self, expiry: NaiveDate, strike: Strike, side: Side) -> Option<&[Candle]> {
        self.bars
            .get(&(expiry, strike.0, side.as_str()))
            .map(|v| v.as_slice())
    }

    pub fn listed_strikes(&self, expiry: NaiveDate, side: Side) -> Vec<Strike> {
        self.bars
            .keys()
            .filter(|(e, _, s)| *e == expiry && *s == side.as_str())
            .map(|(_, strike, _)| Strike(*strike))
            .collect()
    }
}

/// Weekly (or broker-configured) expiry calendar (§4.K, §6.1).
#[derive(Debug, Clone)]
pub struct ExpiryCalendar(Vec<NaiveDate>);

impl ExpiryCalendar {
    pub fn new(mut expiries: Vec<NaiveDate>) -> Self {
        expiries.sort();
        Self(expiries)
    }

    pub fn next_on_or_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.0.iter().find(|d| **d >= date).copied()
    }
}

/// Minimum synthetic/legacy-path premium floor, guards against a zero or
/// negative simulated option price.
const PREMIUM_FLOOR: Decimal = dec!(0.05);

struct SimPosition {
    position: OpenPosition,
    trail_active: bool,
}

/// Runs the §4.H walk-forward simulator over `spot_candles` and returns the
/// aggregate results. `chain` is `None` to force the synthetic premium path.
pub fn run_backtest(
    spot_candles: &[Candle],
    chain: Option<&OptionChain>,
    expiries: &ExpiryCalendar,
    underlying: Underlying,
    moneyness: Moneyness,
    strategy: &StrategySettings,
    initial_capital: Decimal,
) -> BacktestResults {
    let mut capital = initial_capital;
    let mut metrics = MetricsAccumulator::new(initial_capital);

    let inside_bars = detect_inside_bars_scan_all(spot_candles);

    for (post_inside_idx, inside_bar) in inside_bars {
        let Some(breakout) = check_breakout(
            &spot_candles[post_inside_idx..],
            inside_bar.range_high,
            inside_bar.range_low,
            inside_bar.inside_open_time,
        ) else {
            continue;
        };

        let Some(breakout_idx) = spot_candles
            .iter()
            .position(|c| c.close_time == breakout.candle_time)
        else {
            continue;
        };
        let entry_idx = breakout_idx + 1;
        if entry_idx >= spot_candles.len() {
            continue;
        }
        let entry_candle = &spot_candles[entry_idx];
        let entry_spot = entry_candle.open;
        let entry_time = entry_candle.open_time;

        let Some(expiry) = expiries.next_on_or_after(entry_time.with_timezone(&Kolkata).date_naive())
        else {
            debug!("no expiry available on or after entry time, skipping");
            continue;
        };
        if is_expiry_blackout(entry_time, expiry) {
            continue;
        }

        let requested_strike = resolve_strike(entry_spot, breakout.direction, moneyness, underlying);
        let (strike, option_bars) = match chain {
            Some(chain) => {
                let listed = chain.listed_strikes(expiry, breakout.direction);
                let Some(resolved) = nearest_listed_strike(requested_strike, &listed) else {
                    continue;
                };
                let Some(bars) = chain.bars_for(expiry, resolved, breakout.direction) else {
                    continue;
                };
                (resolved, bars.to_vec())
            }
            None => (
                requested_strike,
                synthetic_premium_bars(
                    &spot_candles[entry_idx..],
                    entry_spot,
                    synthetic_entry_premium(entry_spot),
                    breakout.direction,
                ),
            ),
        };

        let forward_bars: Vec<&Candle> = option_bars
            .iter()
            .filter(|b| b.open_time >= entry_time)
            .collect();
        let Some(entry_bar) = forward_bars.first() else {
            continue;
        };
        let entry_premium = entry_bar.open;

        let required_capital = entry_premium * Decimal::from(strategy.lot_size);
        metrics.record_capital_requirement(required_capital);
        if capital < required_capital {
            continue;
        }

        let (sl, tp) = if strategy.use_tiered_exits {
            (
                entry_premium - strategy.sl_points,
                entry_premium + strategy.sl_points * strategy.rr_ratio,
            )
        } else {
            (
                entry_premium * (Decimal::ONE - strategy.legacy_sl_pct),
                entry_premium + strategy.sl_points * strategy.rr_ratio,
            )
        };

        let contract_expiry = expiry;
        let position = OpenPosition::open(
            &crate::types::OptionContract::new(underlying, contract_expiry, strike, breakout.direction),
            format!("BT-{}", entry_time.timestamp()),
            entry_premium,
            sl.max(PREMIUM_FLOOR),
            tp,
            strategy.order_lots,
            strategy.lot_size,
            entry_time,
        );
        let mut sim = SimPosition {
            position,
            trail_active: false,
        };

        let (exit_price, exit_reason, exit_time) =
            walk_forward(&mut sim, &forward_bars[1..], strategy, contract_expiry);

        let pnl = sim.position.realized_pnl;
        capital += pnl;

        let trade = TradeRecord {
            timestamp: entry_time,
            symbol: underlying.symbol().to_string(),
            tradingsymbol: sim.position.tradingsymbol.clone(),
            strike: strike.0,
            direction: breakout.direction,
            order_id: sim.position.order_id.clone(),
            entry: entry_premium,
            sl: sim.position.stop_loss,
            tp,
            exit: Some(exit_price),
            pnl: Some(pnl),
            status: TradeStatus::Closed,
            pre_reason: EntryReason::InsideBarBreakout,
            post_outcome: Some(exit_reason),
            quantity: strategy.order_lots,
        };

        let was_trail_exit = matches!(exit_reason, ExitOutcome::TrailingStop);
        metrics.record_trade(trade, pnl, was_trail_exit, capital, exit_time);
    }

    metrics.finish(initial_capital, capital)
}

fn is_expiry_blackout(entry_time: DateTime<Utc>, expiry: NaiveDate) -> bool {
    let ist = entry_time.with_timezone(&Kolkata);
    if ist.date_naive() != expiry {
        return false;
    }
    ist.time() >= NaiveTime::from_hms_opt(11, 30, 0).unwrap()
}

fn synthetic_entry_premium(spot: Decimal) -> Decimal {
    (spot * dec!(0.005)).max(dec!(50))
}

/// Derives a forward option-premium bar series from spot bars when no chain
/// is available (§4.H step 5): `delta ≈ 0.5`, signed so that CE gains track
/// spot rallies and PE gains track spot selloffs.
fn synthetic_premium_bars(
    spot_bars: &[Candle],
    entry_spot: Decimal,
    entry_premium: Decimal,
    side: Side,
) -> Vec<Candle> {
    let sign = match side {
        Side::Ce => dec!(1),
        Side::Pe => dec!(-1),
    };
    let delta = dec!(0.5);

    spot_bars
        .iter()
        .map(|bar| {
            let map = |spot_price: Decimal| -> Decimal {
                (entry_premium + (spot_price - entry_spot) * sign * delta).max(PREMIUM_FLOOR)
            };
            let open = map(bar.open);
            let close = map(bar.close);
            let a = map(bar.high);
            let b = map(bar.low);
            Candle {
                open_time: bar.open_time,
                close_time: bar.close_time,
                open,
                high: a.max(b),
                low: a.min(b),
                close,
                volume: None,
                is_closed: true,
            }
        })
        .collect()
}

/// Walks the option's forward bars applying trailing/breakeven/tiered-or-
/// legacy exits, in the bar priority §4.H step 7 fixes: SL/trail first, then
/// take-profit tiers, then the expiry protocol.
fn walk_forward(
    sim: &mut SimPosition,
    bars: &[&Candle],
    strategy: &StrategySettings,
    expiry: NaiveDate,
) -> (Decimal, ExitOutcome, DateTime<Utc>) {
    let mut last_bar_close = sim.position.entry_price;
    let mut last_bar_time = sim.position.opened_at;

    for bar in bars {
        last_bar_close = bar.close;
        last_bar_time = bar.close_time;

        apply_trailing_and_breakeven(sim, bar.high, strategy);

        if bar.low <= sim.position.stop_loss {
            let reason = if sim.trail_active {
                ExitOutcome::TrailingStop
            } else {
                ExitOutcome::StopLoss
            };
            let price = sim.position.stop_loss;
            sim.position
                .record_exit_fill(price, sim.position.remaining_qty_lots, bar.close_time);
            return (price, reason, bar.close_time);
        }

        if strategy.use_tiered_exits {
            if !sim.position.book1_done
                && bar.high >= sim.position.entry_price + strategy.book1_points
            {
                use rust_decimal::prelude::ToPrimitive;
                let lots = (Decimal::from(sim.position.remaining_qty_lots) * strategy.book1_ratio)
                    .round()
                    .to_u32()
                    .unwrap_or(0)
                    .max(1)
                    .min(sim.position.remaining_qty_lots);
                let price = sim.position.entry_price + strategy.book1_points;
                sim.position.record_exit_fill(price, lots, bar.close_time);
                sim.position.book1_done = true;
                if sim.position.is_closed() {
                    return (price, ExitOutcome::Tier1Booked, bar.close_time);
                }
            }
            if !sim.position.book2_done
                && bar.high >= sim.position.entry_price + strategy.book2_points
                && sim.position.remaining_qty_lots > 0
            {
                let price = sim.position.entry_price + strategy.book2_points;
                let lots = sim.position.remaining_qty_lots;
                sim.position.record_exit_fill(price, lots, bar.close_time);
                sim.position.book2_done = true;
                return (price, ExitOutcome::Tier2Booked, bar.close_time);
            }
        } else if bar.high >= sim.position.take_profit {
            let price = sim.position.take_profit;
            sim.position
                .record_exit_fill(price, sim.position.remaining_qty_lots, bar.close_time);
            return (price, ExitOutcome::TakeProfit, bar.close_time);
        }

        let ist = bar.close_time.with_timezone(&Kolkata);
        if ist.date_naive() == expiry && ist.time() >= NaiveTime::from_hms_opt(14, 45, 0).unwrap() {
            let price = bar.close;
            sim.position
                .record_exit_fill(price, sim.position.remaining_qty_lots, bar.close_time);
            return (price, ExitOutcome::ExpiryBlackout, bar.close_time);
        }
    }

    // Time exit on the contract's last available bar (legacy path, or a
    // real/synthetic series that simply runs out of data) — distinct from
    // the genuine 14:45 IST expiry force-exit above so PnL-by-exit-reason
    // breakdowns don't conflate a protocol exit with a data artifact.
    let price = last_bar_close;
    sim.position
        .record_exit_fill(price, sim.position.remaining_qty_lots, last_bar_time);
    (price, ExitOutcome::DataExhausted, last_bar_time)
}

fn apply_trailing_and_breakeven(sim: &mut SimPosition, high: Decimal, strategy: &StrategySettings) {
    if !strategy.use_tiered_exits {
        // Legacy progressive-lock ladder: +60/+80/+100% premium gains lock
        // the stop one rung behind the gain, never retreating.
        let entry = sim.position.entry_price;
        let gain_ratio = if entry.is_zero() {
            Decimal::ZERO
        } else {
            (high - entry) / entry
        };
        if gain_ratio >= dec!(1.0) {
            sim.position.raise_stop_loss(entry * dec!(1.7));
            sim.trail_active = true;
        } else if gain_ratio >= dec!(0.8) {
            sim.position.raise_stop_loss(entry * dec!(1.5));
            sim.trail_active = true;
        } else if gain_ratio >= dec!(0.6) {
            sim.position.raise_stop_loss(entry * dec!(1.3));
            sim.trail_active = true;
        }
        return;
    }

    let advance = high - sim.position.trail_anchor;
    if advance >= strategy.trail_points {
        use rust_decimal::prelude::ToPrimitive;
        let steps = (advance / strategy.trail_points).floor().to_i64().unwrap_or(0);
        sim.position.trail_anchor += strategy.trail_points * Decimal::from(steps);
        sim.position
            .raise_stop_loss(sim.position.trail_anchor - strategy.sl_points);
        sim.trail_active = true;
    }
    if !sim.position.be_locked && high >= sim.position.entry_price + strategy.be_at_r * strategy.sl_points {
        sim.position.raise_stop_loss(sim.position.entry_price);
        sim.position.be_locked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn candle(open_time: DateTime<Utc>, o: i64, h: i64, l: i64, c: i64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + chrono::Duration::hours(1),
            open: Decimal::from(o),
            high: Decimal::from(h),
            low: Decimal::from(l),
            close: Decimal::from(c),
            volume: None,
            is_closed: true,
        }
    }

    #[test]
    fn scenario_s1_backtest_exits_on_stop_loss() {
        let candles = vec![
            candle(ist(2026, 7, 27, 9, 15), 100, 110, 95, 105),
            candle(ist(2026, 7, 27, 10, 15), 105, 120, 100, 118),
            candle(ist(2026, 7, 27, 11, 15), 116, 119, 101, 115),
            candle(ist(2026, 7, 27, 12, 15), 115, 125, 114, 122),
            candle(ist(2026, 7, 27, 13, 15), 120, 130, 115, 125),
            candle(ist(2026, 7, 27, 14, 15), 124, 126, 40, 50),
        ];
        let expiries = ExpiryCalendar::new(vec![NaiveDate::from_ymd_opt(2026, 7, 30).unwrap()]);
        let mut strategy = StrategySettings::default();
        strategy.sl_points = dec!(30);
        strategy.rr_ratio = dec!(1.8);

        let results = run_backtest(
            &candles,
            None,
            &expiries,
            Underlying::Nifty,
            Moneyness::Atm,
            &strategy,
            dec!(100000),
        );

        assert_eq!(results.total_trades, 1);
        assert_eq!(results.losing_trades, 1);
        assert_eq!(results.trades[0].post_outcome, Some(ExitOutcome::StopLoss));
    }

    #[test]
    fn backtest_is_idempotent() {
        let candles = vec![
            candle(ist(2026, 7, 27, 9, 15), 100, 110, 95, 105),
            candle(ist(2026, 7, 27, 10, 15), 105, 120, 100, 118),
            candle(ist(2026, 7, 27, 11, 15), 116, 119, 101, 115),
            candle(ist(2026, 7, 27, 12, 15), 115, 125, 114, 122),
            candle(ist(2026, 7, 27, 13, 15), 120, 130, 88, 95),
        ];
        let expiries = ExpiryCalendar::new(vec![NaiveDate::from_ymd_opt(2026, 7, 30).unwrap()]);
        let strategy = StrategySettings::default();

        let first = run_backtest(
            &candles,
            None,
            &expiries,
            Underlying::Nifty,
            Moneyness::Atm,
            &strategy,
            dec!(100000),
        );
        let second = run_backtest(
            &candles,
            None,
            &expiries,
            Underlying::Nifty,
            Moneyness::Atm,
            &strategy,
            dec!(100000),
        );

        assert_eq!(first.total_trades, second.total_trades);
        assert_eq!(first.final_capital, second.final_capital);
    }
}
