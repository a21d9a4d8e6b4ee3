#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{AdapterError, ErrorKind};
use crate::types::{Candle, Underlying};

use super::MarketDataAdapter;

/// An in-memory candle store used to drive the Backtest Engine (§4.H) and
/// unit tests, modeled on the teacher's historical-candle fetch but serving
/// pre-loaded bars instead of hitting a network API.
pub struct HistoricalMarketData {
    series: RwLock<HashMap<Underlying, Arc<Vec<Candle>>>>,
}

impl HistoricalMarketData {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(&self, underlying: Underlying, candles: Vec<Candle>) {
        self.series.write().await.insert(underlying, Arc::new(candles));
    }
}

impl Default for HistoricalMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataAdapter for HistoricalMarketData {
    async fn fetch_1h(
        &self,
        underlying: Underlying,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        let series = self.series.read().await;
        let candles = series.get(&underlying).ok_or_else(|| {
            AdapterError::new(
                ErrorKind::NotFound,
                anyhow::anyhow!("no historical candles loaded for {}", underlying),
            )
        })?;

        Ok(candles
            .iter()
            .filter(|c| c.close_time >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_ohlc_snapshot(&self, underlying: Underlying) -> Result<Candle, AdapterError> {
        let series = self.series.read().await;
        let candles = series.get(&underlying).ok_or_else(|| {
            AdapterError::new(
                ErrorKind::NotFound,
                anyhow::anyhow!("no historical candles loaded for {}", underlying),
            )
        })?;
        candles.last().cloned().ok_or_else(|| {
            AdapterError::new(ErrorKind::NotFound, anyhow::anyhow!("empty candle series"))
        })
    }

    async fn get_last_closed_hour_end(&self, underlying: Underlying) -> Result<DateTime<Utc>, AdapterError> {
        let snapshot = self.fetch_ohlc_snapshot(underlying).await?;
        Ok(snapshot.close_time)
    }
}
