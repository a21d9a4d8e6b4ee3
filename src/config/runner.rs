use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The full set of runtime tunables for the trading engine (§3 `RunnerState`
/// tunables, plus the ambient settings needed to run it).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub strategy: StrategySettings,
    pub risk: RiskSettings,
    pub polling: PollingSettings,
    pub persistence: PersistenceSettings,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.strategy.sl_points <= Decimal::ZERO {
            errors.push("strategy.sl_points must be > 0".to_string());
        }
        if self.strategy.trail_points <= Decimal::ZERO {
            errors.push("strategy.trail_points must be > 0".to_string());
        }
        if self.strategy.order_lots == 0 {
            errors.push("strategy.order_lots must be > 0".to_string());
        }
        if self.strategy.lot_size == 0 {
            errors.push("strategy.lot_size must be > 0".to_string());
        }
        if self.strategy.signal_cooldown_seconds == 0 {
            errors.push("strategy.signal_cooldown_seconds must be > 0".to_string());
        }
        if self.strategy.missed_grace_seconds == 0 {
            errors.push("strategy.missed_grace_seconds must be > 0".to_string());
        }

        if self.risk.initial_capital <= Decimal::ZERO {
            errors.push("risk.initial_capital must be > 0".to_string());
        }
        if self.risk.daily_loss_limit_pct <= Decimal::ZERO
            || self.risk.daily_loss_limit_pct > dec!(100)
        {
            errors.push("risk.daily_loss_limit_pct must be between 0 and 100%".to_string());
        }
        if self.risk.max_concurrent_positions == 0 {
            errors.push("risk.max_concurrent_positions must be > 0".to_string());
        }

        if self.polling.polling_interval_seconds == 0 {
            errors.push("polling.polling_interval_seconds must be > 0".to_string());
        }
        if self.polling.monitor_tick_seconds == 0 {
            errors.push("polling.monitor_tick_seconds must be > 0".to_string());
        }
        if self.polling.reconciliation_interval_seconds == 0 {
            errors.push("polling.reconciliation_interval_seconds must be > 0".to_string());
        }
        if self.polling.history_window_hours == 0 {
            errors.push("polling.history_window_hours must be > 0".to_string());
        }
        if self.polling.min_candle_count == 0 {
            errors.push("polling.min_candle_count must be > 0".to_string());
        }

        if self.persistence.snapshot_retention == 0 {
            errors.push("persistence.snapshot_retention must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Strategy tunables (§3 `RunnerState`, §4.B-E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    pub sl_points: Decimal,
    pub trail_points: Decimal,
    pub order_lots: u32,
    pub lot_size: u32,
    pub atm_offset: i64,
    pub signal_cooldown_seconds: u64,
    /// §9 Open Question resolution: named constant, default 300s, governing
    /// how long a breakout may wait for entry before the signal expires
    /// unconsumed (§4.C missed-trade grace window).
    pub missed_grace_seconds: u64,
    /// §9 Open Question resolution: selects tiered booking (tier1/tier2/
    /// trail) vs the legacy single-target exit in the Position Monitor.
    pub use_tiered_exits: bool,
    pub book1_points: Decimal,
    pub book2_points: Decimal,
    pub book1_ratio: Decimal,
    pub rr_ratio: Decimal,
    /// R-multiple of `sl_points` gained before the breakeven lock fires (§4.G).
    pub be_at_r: Decimal,
    /// Legacy (non-tiered) backtest path initial SL as a fraction of entry.
    pub legacy_sl_pct: Decimal,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            sl_points: dec!(30),
            trail_points: dec!(10),
            order_lots: 1,
            lot_size: 75,
            atm_offset: 0,
            signal_cooldown_seconds: 300,
            missed_grace_seconds: 300,
            use_tiered_exits: true,
            book1_points: dec!(40),
            book2_points: dec!(60),
            book1_ratio: dec!(0.5),
            rr_ratio: dec!(1.8),
            be_at_r: dec!(0.8),
            legacy_sl_pct: dec!(0.35),
        }
    }
}

/// Risk gates applied by the Live Runner before taking a new trade (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    pub initial_capital: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub max_concurrent_positions: usize,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            daily_loss_limit_pct: dec!(3),
            max_concurrent_positions: 1,
        }
    }
}

/// Task cadences (§5) and the market-data fetch window (§4.F step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    pub polling_interval_seconds: u64,
    pub monitor_tick_seconds: u64,
    pub reconciliation_interval_seconds: u64,
    pub history_window_hours: u64,
    pub min_candle_count: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            polling_interval_seconds: 10,
            monitor_tick_seconds: 10,
            reconciliation_interval_seconds: 60,
            history_window_hours: 48,
            min_candle_count: 20,
        }
    }
}

/// Persistence knobs (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    pub journal_path: String,
    pub snapshot_dir: String,
    pub snapshot_retention: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            journal_path: "journal.db".to_string(),
            snapshot_dir: "snapshots".to_string(),
            snapshot_retention: 100,
        }
    }
}
