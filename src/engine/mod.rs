pub mod aligner;
pub mod backtest;
pub mod monitor;
pub mod reconciliation;
pub mod results;
pub mod runner;
pub mod signal;
pub mod strike;

#[allow(unused_imports)]
pub use aligner::CandleAligner;
#[allow(unused_imports)]
pub use backtest::{run_backtest, ExpiryCalendar, OptionChain};
#[allow(unused_imports)]
pub use monitor::{PositionClosedOutcome, PositionMonitor};
#[allow(unused_imports)]
pub use reconciliation::BrokerReconciliation;
#[allow(unused_imports)]
pub use results::BacktestResults;
#[allow(unused_imports)]
pub use runner::LiveRunner;
