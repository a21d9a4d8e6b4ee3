use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::broker::{BrokerAdapter, OrderKind, OrderTransaction};
use crate::config::StrategySettings;
use crate::types::{ExitOutcome, OptionContract, OpenPosition};

/// Outcome of a tick that closed the position (§4.G step 9): the runner's
/// caller journals this and drops the monitor from `activeMonitors`.
#[derive(Debug, Clone)]
pub struct PositionClosedOutcome {
    pub order_id: String,
    pub exit_price: Decimal,
    pub total_pnl: Decimal,
    pub reason: ExitOutcome,
}

/// Runs one position's independent ~10s tick loop (§4.G). Rules are
/// captured at spawn and never change for the lifetime of this monitor,
/// even if the live tunables are updated concurrently.
pub struct PositionMonitor {
    pub position: OpenPosition,
    rules: StrategySettings,
}

impl PositionMonitor {
    pub fn new(position: OpenPosition, rules: StrategySettings) -> Self {
        Self { position, rules }
    }

    /// One monitor tick. Returns `Ok(Some(outcome))` once the position has
    /// fully closed; `Ok(None)` otherwise (including on an LTP fetch
    /// failure, which skips the tick per §4.G step 1).
    pub async fn tick<B: BrokerAdapter + ?Sized>(
        &mut self,
        broker: &B,
        contract: &OptionContract,
        now: DateTime<Utc>,
    ) -> Option<PositionClosedOutcome> {
        let ltp = match broker.get_option_price(contract).await {
            Ok(p) => p,
            Err(e) => {
                warn!(tradingsymbol = %self.position.tradingsymbol, error = %e, "LTP fetch failed, skipping tick");
                return None;
            }
        };

        self.apply_trailing(ltp);
        self.apply_breakeven(ltp);

        let mut closing_reason = None;

        if let Some(lots) = self.tier1_due(ltp) {
            if self.sell_and_record(broker, contract, lots, now).await {
                self.position.book1_done = true;
                if self.position.is_closed() {
                    closing_reason = Some(ExitOutcome::Tier1Booked);
                }
            }
        }

        if let Some(lots) = self.tier2_due(ltp) {
            if self.sell_and_record(broker, contract, lots, now).await {
                self.position.book2_done = true;
                closing_reason = Some(ExitOutcome::Tier2Booked);
            }
        }

        if let Some(lots) = self.stop_loss_due(ltp) {
            if self.sell_and_record(broker, contract, lots, now).await {
                closing_reason = Some(self.sl_or_trail_reason());
            }
        }

        if let Some(lots) = self.expiry_due(now) {
            if self.sell_and_record(broker, contract, lots, now).await {
                closing_reason = Some(ExitOutcome::ExpiryBlackout);
            }
        }

        if self.position.is_closed() {
            let exit_price = self.position.vwap_exit_price().unwrap_or(ltp);
            let reason = closing_reason.unwrap_or(ExitOutcome::StopLoss);
            info!(
                tradingsymbol = %self.position.tradingsymbol,
                pnl = %self.position.realized_pnl,
                "position closed"
            );
            Some(PositionClosedOutcome {
                order_id: self.position.order_id.clone(),
                exit_price,
                total_pnl: self.position.realized_pnl,
                reason,
            })
        } else {
            None
        }
    }

    /// Distinguishes a stop-loss hit at the never-moved initial stop from
    /// one reached after the trailing stop advanced it (§4.G step 6).
    fn sl_or_trail_reason(&self) -> ExitOutcome {
        if self.position.stop_loss == self.position.entry_price - self.rules.sl_points {
            ExitOutcome::StopLoss
        } else {
            ExitOutcome::TrailingStop
        }
    }

    /// §4.G step 2: one-sided upward trailing. `stop_loss` never decreases.
    fn apply_trailing(&mut self, ltp: Decimal) {
        let advance = ltp - self.position.trail_anchor;
        if advance >= self.rules.trail_points {
            use rust_decimal::prelude::ToPrimitive;
            let steps = (advance / self.rules.trail_points)
                .floor()
                .to_i64()
                .unwrap_or(0);
            self.position.trail_anchor += self.rules.trail_points * Decimal::from(steps);
            let candidate = self.position.trail_anchor - self.rules.sl_points;
            self.position.raise_stop_loss(candidate);
        }
    }

    /// §4.G step 3: breakeven lock, fires once.
    fn apply_breakeven(&mut self, ltp: Decimal) {
        if !self.position.be_locked
            && ltp >= self.position.entry_price + self.rules.be_at_r * self.rules.sl_points
        {
            self.position.raise_stop_loss(self.position.entry_price);
            self.position.be_locked = true;
        }
    }

    /// §4.G step 4.
    fn tier1_due(&self, ltp: Decimal) -> Option<u32> {
        if self.position.book1_done || !self.rules.use_tiered_exits {
            return None;
        }
        if ltp >= self.position.entry_price + self.rules.book1_points {
            use rust_decimal::prelude::ToPrimitive;
            let qty = (Decimal::from(self.position.remaining_qty_lots) * self.rules.book1_ratio)
                .round()
                .to_u32()
                .unwrap_or(0);
            if qty > 0 {
                return Some(qty);
            }
        }
        None
    }

    /// §4.G step 5.
    fn tier2_due(&self, ltp: Decimal) -> Option<u32> {
        if self.position.book2_done || !self.rules.use_tiered_exits {
            return None;
        }
        if ltp >= self.position.entry_price + self.rules.book2_points
            && self.position.remaining_qty_lots > 0
        {
            return Some(self.position.remaining_qty_lots);
        }
        None
    }

    /// §4.G step 6.
    fn stop_loss_due(&self, ltp: Decimal) -> Option<u32> {
        if ltp <= self.position.stop_loss && self.position.remaining_qty_lots > 0 {
            Some(self.position.remaining_qty_lots)
        } else {
            None
        }
    }

    /// §4.G step 7: expiry protocol.
    fn expiry_due(&self, now: DateTime<Utc>) -> Option<u32> {
        if self.position.remaining_qty_lots == 0 {
            return None;
        }
        let ist = now.with_timezone(&Kolkata);
        if ist.date_naive() != self.position.expiry {
            return None;
        }
        let force_exit = NaiveTime::from_hms_opt(14, 45, 0).unwrap();
        if ist.time() >= force_exit {
            return Some(self.position.remaining_qty_lots);
        }
        None
    }

    /// Place a SELL order and, only on a confirmed fill, commit the
    /// resulting PnL/remaining-qty mutation (§4.G step 8, invariant #6).
    /// Returns whether the fill was confirmed.
    async fn sell_and_record<B: BrokerAdapter + ?Sized>(
        &mut self,
        broker: &B,
        contract: &OptionContract,
        lots: u32,
        now: DateTime<Utc>,
    ) -> bool {
        match broker
            .place_order(contract, OrderTransaction::Sell, OrderKind::Market, lots, None)
            .await
        {
            Ok(result) if result.filled_price.is_some() => {
                let price = result.filled_price.unwrap();
                self.position.record_exit_fill(price, lots, now);
                true
            }
            Ok(_) | Err(_) => {
                warn!(
                    tradingsymbol = %self.position.tradingsymbol,
                    lots,
                    "exit order did not fill; remaining unchanged, retrying next tick"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::types::{Side, Strike, Underlying};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn contract() -> OptionContract {
        OptionContract::new(
            Underlying::Nifty,
            chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            Strike(24800),
            Side::Ce,
        )
    }

    fn rules() -> StrategySettings {
        let mut r = StrategySettings::default();
        r.sl_points = dec!(30);
        r.trail_points = dec!(10);
        r.book1_points = dec!(40);
        r.book2_points = dec!(54);
        r.book1_ratio = dec!(0.5);
        r
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn scenario_s1_sl_hit_exits_at_stop() {
        let position = OpenPosition::open(
            &contract(),
            "ORD1".to_string(),
            dec!(120),
            dec!(90),
            dec!(174),
            1,
            75,
            now(),
        );
        let mut monitor = PositionMonitor::new(position, rules());
        let broker = PaperBroker::new(dec!(1000000), dec!(88));

        let outcome = monitor.tick(&broker, &contract(), now()).await;
        let outcome = outcome.expect("SL hit should close the position");
        assert_eq!(outcome.reason, ExitOutcome::StopLoss);
        assert_eq!(outcome.total_pnl, (dec!(88) - dec!(120)) * dec!(75));
    }

    #[tokio::test]
    async fn scenario_s2_tier1_then_trail_exit() {
        let position = OpenPosition::open(
            &contract(),
            "ORD2".to_string(),
            dec!(100),
            dec!(70),
            dec!(154),
            2,
            75,
            now(),
        );
        let mut monitor = PositionMonitor::new(position, rules());
        let broker = PaperBroker::new(dec!(1000000), dec!(142));

        monitor.tick(&broker, &contract(), now()).await;
        assert!(monitor.position.book1_done);
        assert_eq!(monitor.position.remaining_qty_lots, 1);
        assert_eq!(monitor.position.stop_loss, dec!(110));

        broker.set_last_price(dec!(150)).await;
        monitor.tick(&broker, &contract(), now()).await;
        assert_eq!(monitor.position.stop_loss, dec!(120));

        broker.set_last_price(dec!(119)).await;
        let outcome = monitor.tick(&broker, &contract(), now()).await;
        let outcome = outcome.expect("trail stop should close remaining lot");
        assert_eq!(outcome.reason, ExitOutcome::TrailingStop);

        let expected_pnl = (dec!(142) - dec!(100)) * dec!(75) + (dec!(119) - dec!(100)) * dec!(75);
        assert_eq!(outcome.total_pnl, expected_pnl);
    }
}
