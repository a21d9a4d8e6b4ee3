use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

#[allow(unused_imports)]
use crate::types::{ExitOutcome, TradeRecord, TradeStatus};

use super::TradeJournal;

/// SQLite-backed journal, the default implementation. Schema is created on
/// first connect, mirroring the journal's fixed column order (§6.4).
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    pub async fn new(db_path: &str) -> Result<Self> {
        info!(db_path, "initializing trade journal database");

        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let journal = Self { pool };
        journal.create_schema().await?;
        Ok(journal)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                tradingsymbol TEXT NOT NULL,
                strike INTEGER NOT NULL,
                direction TEXT NOT NULL,
                order_id TEXT NOT NULL,
                entry TEXT NOT NULL,
                sl TEXT NOT NULL,
                tp TEXT NOT NULL,
                exit TEXT,
                pnl TEXT,
                status TEXT NOT NULL,
                pre_reason TEXT NOT NULL,
                post_outcome TEXT,
                quantity INTEGER NOT NULL,
                PRIMARY KEY (order_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS missed_trades (
                timestamp TEXT NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TradeJournal for SqliteJournal {
    async fn append_open(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (timestamp, symbol, tradingsymbol, strike, direction, order_id,
                 entry, sl, tp, exit, pnl, status, pre_reason, post_outcome, quantity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, NULL, ?)
            "#,
        )
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.symbol)
        .bind(&record.tradingsymbol)
        .bind(record.strike)
        .bind(record.direction.as_str())
        .bind(&record.order_id)
        .bind(record.entry.to_string())
        .bind(record.sl.to_string())
        .bind(record.tp.to_string())
        .bind("open")
        .bind(record.pre_reason.as_str())
        .bind(record.quantity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_exit(
        &self,
        order_id: &str,
        exit_price: Decimal,
        pnl: Decimal,
        outcome: ExitOutcome,
    ) -> Result<()> {
        // Idempotent by order_id (invariant #10): only updates a still-open row.
        sqlx::query(
            r#"
            UPDATE trades SET exit = ?, pnl = ?, status = 'closed', post_outcome = ?
            WHERE order_id = ? AND status = 'open'
            "#,
        )
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(outcome.as_str())
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_missed(&self, reason: &str) -> Result<()> {
        sqlx::query("INSERT INTO missed_trades (timestamp, reason) VALUES (?, ?)")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryReason, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn open_then_exit_is_idempotent() {
        let journal = SqliteJournal::new("sqlite::memory:").await.unwrap();
        let record = TradeRecord {
            timestamp: Utc::now(),
            symbol: "NIFTY".to_string(),
            tradingsymbol: "NIFTY06AUG2624800CE".to_string(),
            strike: 24800,
            direction: Side::Ce,
            order_id: "ORD1".to_string(),
            entry: dec!(120),
            sl: dec!(90),
            tp: dec!(174),
            exit: None,
            pnl: None,
            status: TradeStatus::Open,
            pre_reason: EntryReason::InsideBarBreakout,
            post_outcome: None,
            quantity: 1,
        };
        journal.append_open(&record).await.unwrap();
        journal
            .record_exit("ORD1", dec!(90), dec!(-30), ExitOutcome::StopLoss)
            .await
            .unwrap();

        // A second close attempt must not overwrite a prior close.
        journal
            .record_exit("ORD1", dec!(200), dec!(500), ExitOutcome::TakeProfit)
            .await
            .unwrap();

        let row: (String, Option<String>) =
            sqlx::query_as("SELECT status, exit FROM trades WHERE order_id = 'ORD1'")
                .fetch_one(&journal.pool)
                .await
                .unwrap();
        assert_eq!(row.0, "closed");
        assert_eq!(row.1, Some("90".to_string()));
    }
}
