use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::{ExitOutcome, TradeRecord};

use super::TradeJournal;

const HEADER: &str = "timestamp,symbol,tradingsymbol,strike,direction,order_id,entry,sl,tp,exit,pnl,status,pre_reason,post_outcome,quantity";

/// CSV-backed fallback journal (§9: "journal writing falls back to CSV
/// deterministically" when no database driver is configured). Append-only;
/// exit updates are appended as a second row rather than rewritten in place,
/// since CSV has no random-access update — the last row per `order_id` wins
/// on read.
pub struct CsvJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvJournal {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .await?;
            file.write_all(format!("{}\n", HEADER).as_bytes()).await?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    async fn append_line(&self, line: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for CsvJournal {
    async fn append_open(&self, record: &TradeRecord) -> Result<()> {
        let line = format!(
            "{},{},{},{},{},{},{},{},{},,,open,{},,{}",
            record.timestamp.to_rfc3339(),
            record.symbol,
            record.tradingsymbol,
            record.strike,
            record.direction,
            record.order_id,
            record.entry,
            record.sl,
            record.tp,
            record.pre_reason.as_str(),
            record.quantity,
        );
        self.append_line(line).await
    }

    async fn record_exit(
        &self,
        order_id: &str,
        exit_price: Decimal,
        pnl: Decimal,
        outcome: ExitOutcome,
    ) -> Result<()> {
        let line = format!(
            "{},,,,,{},,,,{},{},closed,,{},",
            chrono::Utc::now().to_rfc3339(),
            order_id,
            exit_price,
            pnl,
            outcome.as_str(),
        );
        self.append_line(line).await
    }

    async fn record_missed(&self, reason: &str) -> Result<()> {
        self.append_line(format!("# missed_trade,{},{}", chrono::Utc::now().to_rfc3339(), reason))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryReason, Side, TradeStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn append_writes_header_once() {
        let dir = std::env::temp_dir().join(format!("journal-test-{}", uuid::Uuid::new_v4()));
        let journal = CsvJournal::new(&dir).await.unwrap();
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

        let contents = tokio::fs::read_to_string(&dir).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with(HEADER));

        tokio::fs::remove_file(&dir).await.ok();
    }
}
