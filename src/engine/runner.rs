use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::{BrokerAdapter, OrderKind, OrderTransaction};
use crate::calendar::is_market_hours;
use crate::config::RunnerConfigManager;
use crate::engine::monitor::PositionMonitor;
use crate::engine::signal::{check_breakout, detect_latest_active_inside_bar, is_missed};
use crate::engine::strike::resolve_strike;
use crate::events::{Event, EventBus};
use crate::journal::TradeJournal;
use crate::market_data::MarketDataAdapter;
use crate::types::{
    ActiveSignal, EntryReason, Moneyness, OpenPosition, OptionContract, SignalFingerprint,
    SignalState, TradeRecord, TradeStatus, Underlying,
};

/// What happened on one control-loop cycle (§4.F), surfaced mainly for
/// tests and the CLI's `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    MarketClosed,
    InsufficientData,
    NoSignal,
    Refused(&'static str),
    OrderPlaced { order_id: String },
}

struct DailyPnl {
    value: Decimal,
    date: Option<chrono::NaiveDate>,
}

/// Owns the runner-exclusive state for one underlying (§3 `RunnerState`):
/// the signal state machine, duplicate-suppression fingerprints, daily PnL,
/// and the execution-arm interlock. `activeMonitors` here is a read-only
/// projection refreshed by each spawned `PositionMonitor` after its own
/// tick; the monitor task remains the exclusive writer of its position.
pub struct LiveRunner {
    market_data: Arc<dyn MarketDataAdapter>,
    broker: Arc<dyn BrokerAdapter>,
    journal: Arc<dyn TradeJournal>,
    events: Arc<EventBus>,
    config: RunnerConfigManager,
    underlying: Underlying,
    execution_armed: Arc<AtomicBool>,
    daily_pnl: Arc<Mutex<DailyPnl>>,
    recent_signals: Arc<Mutex<HashMap<SignalFingerprint, DateTime<Utc>>>>,
    active_signal: Arc<Mutex<Option<ActiveSignal>>>,
    active_positions: Arc<Mutex<HashMap<String, OpenPosition>>>,
}

impl LiveRunner {
    pub fn new(
        market_data: Arc<dyn MarketDataAdapter>,
        broker: Arc<dyn BrokerAdapter>,
        journal: Arc<dyn TradeJournal>,
        events: Arc<EventBus>,
        config: RunnerConfigManager,
        underlying: Underlying,
    ) -> Self {
        Self {
            market_data,
            broker,
            journal,
            events,
            config,
            underlying,
            // §6.3: defaults to false on process start.
            execution_armed: Arc::new(AtomicBool::new(false)),
            daily_pnl: Arc::new(Mutex::new(DailyPnl {
                value: Decimal::ZERO,
                date: None,
            })),
            recent_signals: Arc::new(Mutex::new(HashMap::new())),
            active_signal: Arc::new(Mutex::new(None)),
            active_positions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sets the execution-arm safety interlock; every transition is logged
    /// (§6.3 requirement).
    pub fn set_execution_armed(&self, armed: bool) {
        self.execution_armed.store(armed, Ordering::SeqCst);
        info!(armed, "execution-armed flag changed");
    }

    pub fn is_execution_armed(&self) -> bool {
        self.execution_armed.load(Ordering::SeqCst)
    }

    pub async fn active_position_count(&self) -> usize {
        self.active_positions.lock().await.len()
    }

    /// Deep-copied read of the currently tracked positions, for state
    /// snapshots and the `status` CLI command (§6.4, §5 shared-resource
    /// policy: reads never alias the monitor's owned copy).
    pub async fn snapshot_positions(&self) -> Vec<OpenPosition> {
        self.active_positions.lock().await.values().cloned().collect()
    }

    pub async fn daily_pnl(&self) -> Decimal {
        self.daily_pnl.lock().await.value
    }

    pub fn broker(&self) -> Arc<dyn BrokerAdapter> {
        Arc::clone(&self.broker)
    }

    /// Exposes the live config manager so callers (e.g. the CLI's `live`
    /// loop) can push a reloaded on-disk config into effect between
    /// cycles (§6.3: tunable updates apply on the next cycle).
    pub fn config_manager(&self) -> RunnerConfigManager {
        self.config.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub async fn active_signal_snapshot(&self) -> Option<ActiveSignal> {
        self.active_signal.lock().await.clone()
    }

    /// Runs one control-loop cycle (§4.F). Gates execute in the fixed order
    /// the spec lists; a failing gate aborts the rest and records exactly
    /// one missed-trade row (invariant #7).
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleOutcome {
        if !is_market_hours(now) {
            return CycleOutcome::MarketClosed;
        }

        let config = self.config.get_config().await;

        let candles = match self.fetch_with_window_expansion(now, &config).await {
            Some(c) => c,
            None => return CycleOutcome::InsufficientData,
        };

        self.prune_recent_signals(now, config.strategy.signal_cooldown_seconds)
            .await;

        let Some((direction, breakout, strike_hint)) =
            self.advance_signal_state(&candles, now, config.strategy.missed_grace_seconds, config.strategy.atm_offset)
                .await
        else {
            return CycleOutcome::NoSignal;
        };

        // Duplicate suppression.
        let fingerprint = SignalFingerprint::new(
            direction,
            strike_hint.0,
            breakout.range_high,
            breakout.range_low,
            breakout.candle_time,
        );
        {
            let recent = self.recent_signals.lock().await;
            if let Some(seen_at) = recent.get(&fingerprint) {
                let cooldown = chrono::Duration::seconds(config.strategy.signal_cooldown_seconds as i64);
                if now.signed_duration_since(*seen_at) < cooldown {
                    drop(recent);
                    self.record_refusal("cooldown").await;
                    return CycleOutcome::Refused("cooldown");
                }
            }
        }

        // Daily-loss gate.
        {
            let mut daily = self.daily_pnl.lock().await;
            let today = now.with_timezone(&Kolkata).date_naive();
            if daily.date != Some(today) {
                daily.value = Decimal::ZERO;
                daily.date = Some(today);
            }
            let limit = config.risk.daily_loss_limit_pct / Decimal::from(100) * config.risk.initial_capital;
            if daily.value <= -limit {
                drop(daily);
                self.events.publish(Event::DailyLossBreached {
                    daily_pnl: self.daily_pnl.lock().await.value,
                    limit_pct: config.risk.daily_loss_limit_pct,
                });
                self.record_refusal("daily_loss_limit").await;
                return CycleOutcome::Refused("daily_loss_limit");
            }
        }

        // Concurrent-position gate.
        if self.active_positions.lock().await.len() >= config.risk.max_concurrent_positions {
            self.record_refusal("max_concurrent_positions").await;
            return CycleOutcome::Refused("max_concurrent_positions");
        }

        // Expiry gate.
        let expiry = match self.broker.get_option_expiries(self.underlying).await {
            Ok(expiries) => {
                let today = now.with_timezone(&Kolkata).date_naive();
                let mut candidates: Vec<_> = expiries.into_iter().filter(|e| *e >= today).collect();
                candidates.sort();
                candidates.into_iter().next()
            }
            Err(_) => None,
        };
        let Some(expiry) = expiry else {
            self.record_refusal("no_valid_expiry").await;
            return CycleOutcome::Refused("no_valid_expiry");
        };
        let ist_now = now.with_timezone(&Kolkata);
        let days_to_expiry = (expiry - ist_now.date_naive()).num_days();
        if days_to_expiry < 1
            || (days_to_expiry == 0 && ist_now.time() > NaiveTime::from_hms_opt(14, 0, 0).unwrap())
        {
            self.record_refusal("expiry_blackout").await;
            return CycleOutcome::Refused("expiry_blackout");
        }

        // Strike resolution (re-derived from the latest close, same inputs
        // as the fingerprint hint above).
        let last_close = candles.last().map(|c| c.close).unwrap_or_default();
        let moneyness = moneyness_from_offset(config.strategy.atm_offset);
        let strike = resolve_strike(last_close, direction, moneyness, self.underlying);
        let contract = OptionContract::new(self.underlying, expiry, strike, direction);

        // Price fetch.
        let entry_price = match self.broker.get_option_price(&contract).await {
            Ok(p) => p,
            Err(_) => {
                self.record_refusal("price_unavailable").await;
                return CycleOutcome::Refused("price_unavailable");
            }
        };

        let sl = entry_price - config.strategy.sl_points;
        let tp = entry_price + config.strategy.sl_points * config.strategy.rr_ratio;

        // Margin gate.
        let required = entry_price * Decimal::from(config.strategy.order_lots) * Decimal::from(config.strategy.lot_size);
        let available = match self.broker.get_available_margin().await {
            Ok(m) => m,
            Err(_) => {
                self.record_refusal("margin_unavailable").await;
                return CycleOutcome::Refused("margin_unavailable");
            }
        };
        if available < required {
            self.record_refusal("insufficient_margin").await;
            return CycleOutcome::Refused("insufficient_margin");
        }

        // Execution-arm gate.
        if !self.is_execution_armed() {
            self.record_refusal("execution_not_armed").await;
            return CycleOutcome::Refused("execution_not_armed");
        }

        // Place BUY order.
        let placed = self
            .broker
            .place_order(&contract, OrderTransaction::Buy, OrderKind::Market, config.strategy.order_lots, None)
            .await;
        let order_result = match placed {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "order placement failed");
                self.journal.record_missed("order_rejected").await.ok();
                return CycleOutcome::Refused("order_rejected");
            }
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        if let Ok(status) = self.broker.get_order_status(&order_result.order_id).await {
            if !matches!(
                status.status,
                crate::broker::BrokerOrderStatus::Complete
                    | crate::broker::BrokerOrderStatus::Open
                    | crate::broker::BrokerOrderStatus::Filled
            ) {
                warn!(order_id = %order_result.order_id, "order status unclear after grace period, proceeding optimistically");
            }
        }

        let trade = TradeRecord {
            timestamp: now,
            symbol: self.underlying.symbol().to_string(),
            tradingsymbol: contract.tradingsymbol.clone(),
            strike: strike.0,
            direction,
            order_id: order_result.order_id.clone(),
            entry: entry_price,
            sl,
            tp,
            exit: None,
            pnl: None,
            status: TradeStatus::Open,
            pre_reason: EntryReason::InsideBarBreakout,
            post_outcome: None,
            quantity: config.strategy.order_lots,
        };
        if let Err(e) = self.journal.append_open(&trade).await {
            warn!(error = %e, "failed to journal opened trade");
        }

        self.recent_signals
            .lock()
            .await
            .insert(fingerprint, now);

        self.events.publish(Event::TradeExecuted {
            order_id: order_result.order_id.clone(),
            tradingsymbol: contract.tradingsymbol.clone(),
            entry: entry_price,
        });

        let position = OpenPosition::open(
            &contract,
            order_result.order_id.clone(),
            entry_price,
            sl,
            tp,
            config.strategy.order_lots,
            config.strategy.lot_size,
            now,
        );
        self.active_positions
            .lock()
            .await
            .insert(order_result.order_id.clone(), position.clone());
        self.spawn_monitor(position, contract, config.strategy.clone(), config.polling.monitor_tick_seconds);

        CycleOutcome::OrderPlaced {
            order_id: order_result.order_id,
        }
    }

    /// §4.D transitions 1 & 2. Returns `Some` only on a fresh `Consumed`
    /// transition this cycle; a `MissedExpired` transition is journaled and
    /// reported as no signal for order-placement purposes.
    async fn advance_signal_state(
        &self,
        candles: &[crate::types::Candle],
        now: DateTime<Utc>,
        missed_grace_seconds: u64,
        atm_offset: i64,
    ) -> Option<(crate::types::Side, crate::types::BreakoutEvent, crate::types::Strike)> {
        let mut active = self.active_signal.lock().await;

        if let Some((_, inside_bar)) = detect_latest_active_inside_bar(candles) {
            let replace = match &*active {
                None => true,
                Some(existing) => inside_bar.inside_open_time > existing.inside_bar.inside_open_time,
            };
            if replace {
                *active = Some(ActiveSignal::armed(inside_bar, now));
            }
        }

        let Some(signal) = active.as_mut() else {
            return None;
        };
        if signal.state != SignalState::Armed {
            return None;
        }

        let breakout = check_breakout(
            candles,
            signal.inside_bar.range_high,
            signal.inside_bar.range_low,
            signal.inside_bar.inside_open_time,
        )?;

        if is_missed(&breakout, now, missed_grace_seconds) {
            signal.expire_missed();
            let reason = breakout.direction;
            *active = None;
            drop(active);
            self.journal
                .record_missed(&format!("missed_breakout_{:?}", reason))
                .await
                .ok();
            return None;
        }

        let moneyness = moneyness_from_offset(atm_offset);
        let last_close = candles.last().map(|c| c.close).unwrap_or_default();
        let strike = resolve_strike(last_close, breakout.direction, moneyness, self.underlying);
        signal.consume(breakout.clone(), strike.0);
        *active = None;
        Some((breakout.direction, breakout, strike))
    }

    async fn fetch_with_window_expansion(
        &self,
        now: DateTime<Utc>,
        config: &crate::config::RunnerConfig,
    ) -> Option<Vec<crate::types::Candle>> {
        let mut window_hours = config.polling.history_window_hours;
        for _ in 0..2 {
            let since = now - chrono::Duration::hours(window_hours as i64);
            match self.market_data.fetch_1h(self.underlying, since, 1000).await {
                Ok(candles) if candles.len() >= config.polling.min_candle_count => return Some(candles),
                Ok(_) => {
                    window_hours *= 2;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "market data fetch failed");
                    return None;
                }
            }
        }
        None
    }

    async fn prune_recent_signals(&self, now: DateTime<Utc>, cooldown_seconds: u64) {
        let cooldown = chrono::Duration::seconds(cooldown_seconds as i64);
        self.recent_signals
            .lock()
            .await
            .retain(|_, seen_at| now.signed_duration_since(*seen_at) < cooldown);
    }

    async fn record_refusal(&self, reason: &str) {
        self.journal.record_missed(reason).await.ok();
    }

    /// Spawns the independent ~`tick_seconds` monitor loop for a freshly
    /// opened position (§4.G). On close, records the exit and drops the
    /// order id from the concurrent-position count.
    fn spawn_monitor(
        &self,
        position: OpenPosition,
        contract: OptionContract,
        rules: crate::config::StrategySettings,
        tick_seconds: u64,
    ) {
        let broker = Arc::clone(&self.broker);
        let journal = Arc::clone(&self.journal);
        let events = Arc::clone(&self.events);
        let active_positions = Arc::clone(&self.active_positions);
        let daily_pnl = Arc::clone(&self.daily_pnl);

        tokio::spawn(async move {
            let order_id = position.order_id.clone();
            let mut monitor = PositionMonitor::new(position, rules);
            loop {
                tokio::time::sleep(Duration::from_secs(tick_seconds)).await;
                let now = Utc::now();
                if let Some(outcome) = monitor.tick(broker.as_ref(), &contract, now).await {
                    if let Err(e) = journal
                        .record_exit(&outcome.order_id, outcome.exit_price, outcome.total_pnl, outcome.reason)
                        .await
                    {
                        warn!(error = %e, "failed to journal closed trade");
                    }
                    daily_pnl.lock().await.value += outcome.total_pnl;
                    events.publish(Event::PositionClosed {
                        order_id: outcome.order_id,
                        exit_price: outcome.exit_price,
                        pnl: outcome.total_pnl,
                        reason: outcome.reason.as_str().to_string(),
                    });
                    active_positions.lock().await.remove(&order_id);
                    break;
                } else {
                    active_positions
                        .lock()
                        .await
                        .insert(order_id.clone(), monitor.position.clone());
                }
            }
        });
    }
}

/// §9 Open Question resolution: the runner's single `atmOffset` tunable
/// selects ATM when zero, otherwise an out-of-the-money strike `offset`
/// steps away — the conventional premium-reduction setup for option buyers.
fn moneyness_from_offset(atm_offset: i64) -> Moneyness {
    if atm_offset == 0 {
        Moneyness::Atm
    } else {
        Moneyness::Otm(atm_offset.unsigned_abs() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::config::RunnerConfig;
    use crate::journal::CsvJournal;
    use crate::market_data::HistoricalMarketData;
    use crate::types::Candle;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

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

    #[tokio::test]
    async fn cycle_outside_market_hours_is_idle() {
        let market_data = Arc::new(HistoricalMarketData::new());
        let broker = Arc::new(PaperBroker::new(dec!(1000000), dec!(120)));
        let journal = Arc::new(CsvJournal::new(std::env::temp_dir().join(format!(
            "runner-test-{}.csv",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap());
        let events = Arc::new(EventBus::new());
        let config = RunnerConfigManager::new(RunnerConfig::default());

        let runner = LiveRunner::new(market_data, broker, journal, events, config, Underlying::Nifty);
        let sunday = ist(2026, 8, 2, 10, 0);
        assert_eq!(runner.run_cycle(sunday).await, CycleOutcome::MarketClosed);
    }

    #[tokio::test]
    async fn cycle_refuses_without_execution_armed() {
        let market_data = Arc::new(HistoricalMarketData::new());
        let bars = vec![
            candle(ist(2026, 7, 27, 9, 15), 100, 110, 95, 105),
            candle(ist(2026, 7, 27, 10, 15), 105, 120, 100, 118),
            candle(ist(2026, 7, 27, 11, 15), 116, 119, 101, 115),
            candle(ist(2026, 7, 27, 12, 15), 115, 125, 114, 122),
        ];
        market_data.load(Underlying::Nifty, bars.clone()).await;

        let broker = Arc::new(PaperBroker::new(dec!(1000000), dec!(120)));
        let journal = Arc::new(CsvJournal::new(std::env::temp_dir().join(format!(
            "runner-test-{}.csv",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap());
        let events = Arc::new(EventBus::new());
        let config = RunnerConfigManager::new(RunnerConfig::default());

        let runner = LiveRunner::new(market_data, broker, journal, events, config, Underlying::Nifty);
        let outcome = runner.run_cycle(ist(2026, 7, 27, 13, 0)).await;
        match outcome {
            CycleOutcome::NoSignal | CycleOutcome::InsufficientData | CycleOutcome::Refused(_) => {}
            other => panic!("unexpected outcome without execution armed: {other:?}"),
        }
    }
}
