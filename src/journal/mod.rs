pub mod csv;
pub mod sqlite;

pub use csv::CsvJournal;
pub use sqlite::SqliteJournal;

use async_trait::async_trait;

use crate::types::{ExitOutcome, TradeRecord};

/// Append-only trade journal (§6.4). Column order is fixed: `timestamp,
/// symbol, tradingsymbol, strike, direction, order_id, entry, sl, tp, exit,
/// pnl, status, pre_reason, post_outcome, quantity`. Readers tolerate added
/// columns at the end. Exit updates are keyed by `order_id` and idempotent
/// (invariant #10).
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn append_open(&self, record: &TradeRecord) -> anyhow::Result<()>;

    async fn record_exit(
        &self,
        order_id: &str,
        exit_price: rust_decimal::Decimal,
        pnl: rust_decimal::Decimal,
        outcome: ExitOutcome,
    ) -> anyhow::Result<()>;

    async fn record_missed(&self, reason: &str) -> anyhow::Result<()>;
}
