use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::TradeRecord;

/// One point on the backtest equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Aggregate backtest statistics (§4.H step 9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub max_drawdown_pct: Decimal,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
    pub capital_exhausted: bool,
    pub average_capital_requirement: Decimal,
    pub trail_exit_share_of_wins_pct: Decimal,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
}

/// Accumulates trades into `BacktestResults` as the walk-forward simulator
/// closes each position, mirroring the running-max drawdown and streak
/// bookkeeping the teacher's metrics calculator performs per trade.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    capital_requirements: Vec<Decimal>,
    peak_equity: Decimal,
    max_drawdown_pct: Decimal,
    current_streak: i64,
    longest_win_streak: u32,
    longest_loss_streak: u32,
    capital_exhausted: bool,
    trail_exit_wins: u64,
    wins: u64,
    losses: u64,
    gross_win: Decimal,
    gross_loss: Decimal,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
}

impl MetricsAccumulator {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            peak_equity: initial_capital,
            ..Default::default()
        }
    }

    pub fn record_capital_requirement(&mut self, required: Decimal) {
        self.capital_requirements.push(required);
    }

    pub fn record_trade(
        &mut self,
        trade: TradeRecord,
        pnl: Decimal,
        was_trail_exit: bool,
        equity_after: Decimal,
        timestamp: DateTime<Utc>,
    ) {
        if pnl > Decimal::ZERO {
            self.wins += 1;
            self.gross_win += pnl;
            if was_trail_exit {
                self.trail_exit_wins += 1;
            }
            self.current_streak = if self.current_streak > 0 {
                self.current_streak + 1
            } else {
                1
            };
            self.longest_win_streak = self.longest_win_streak.max(self.current_streak as u32);
        } else if pnl < Decimal::ZERO {
            self.losses += 1;
            self.gross_loss += pnl.abs();
            self.current_streak = if self.current_streak < 0 {
                self.current_streak - 1
            } else {
                -1
            };
            self.longest_loss_streak = self.longest_loss_streak.max((-self.current_streak) as u32);
        }

        self.peak_equity = self.peak_equity.max(equity_after);
        if !self.peak_equity.is_zero() {
            let drawdown = (self.peak_equity - equity_after) / self.peak_equity * dec!(100);
            self.max_drawdown_pct = self.max_drawdown_pct.max(drawdown);
        }
        if equity_after <= Decimal::ZERO {
            self.capital_exhausted = true;
        }

        self.equity_curve.push(EquityPoint {
            timestamp,
            equity: equity_after,
        });
        self.trades.push(trade);
    }

    pub fn finish(self, initial_capital: Decimal, final_capital: Decimal) -> BacktestResults {
        let total_trades = self.trades.len() as u64;
        let win_rate_pct = if total_trades > 0 {
            Decimal::from(self.wins) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };
        let average_win = if self.wins > 0 {
            self.gross_win / Decimal::from(self.wins)
        } else {
            Decimal::ZERO
        };
        let average_loss = if self.losses > 0 {
            self.gross_loss / Decimal::from(self.losses)
        } else {
            Decimal::ZERO
        };
        let average_capital_requirement = if !self.capital_requirements.is_empty() {
            self.capital_requirements.iter().sum::<Decimal>()
                / Decimal::from(self.capital_requirements.len() as u64)
        } else {
            Decimal::ZERO
        };
        let trail_exit_share_of_wins_pct = if self.wins > 0 {
            Decimal::from(self.trail_exit_wins) / Decimal::from(self.wins) * dec!(100)
        } else {
            Decimal::ZERO
        };

        BacktestResults {
            initial_capital,
            final_capital,
            total_trades,
            winning_trades: self.wins,
            losing_trades: self.losses,
            win_rate_pct,
            average_win,
            average_loss,
            max_drawdown_pct: self.max_drawdown_pct,
            longest_win_streak: self.longest_win_streak,
            longest_loss_streak: self.longest_loss_streak,
            capital_exhausted: self.capital_exhausted,
            average_capital_requirement,
            trail_exit_share_of_wins_pct,
            equity_curve: self.equity_curve,
            trades: self.trades,
        }
    }
}
