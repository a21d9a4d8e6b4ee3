pub mod historical;

pub use historical::HistoricalMarketData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AdapterError;
use crate::types::{Candle, Underlying};

/// The market-data-facing contract (§6.2). `fetch_1h` returns closed
/// candles only; a forming bar is never handed to pattern detection (§9
/// Open Question: forming-bar exclusion).
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    async fn fetch_1h(
        &self,
        underlying: Underlying,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError>;

    /// Last-traded-price snapshot, used to merge into the still-forming bar
    /// for trailing-stop evaluation between candle closes (§4.A, §4.G).
    async fn fetch_ohlc_snapshot(&self, underlying: Underlying) -> Result<Candle, AdapterError>;

    async fn get_last_closed_hour_end(&self, underlying: Underlying) -> Result<DateTime<Utc>, AdapterError>;
}
