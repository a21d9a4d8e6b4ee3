#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::{AdapterError, ErrorKind};
#[allow(unused_imports)]
use crate::types::{OptionContract, Side, Underlying};

use super::{
    BrokerAdapter, BrokerOrderResult, BrokerOrderStatus, BrokerPosition, OrderKind,
    OrderTransaction,
};

/// A deterministic paper/mock broker for dry-run operation and tests.
/// Orders fill immediately at the requested price (or a caller-seeded last
/// price for market orders), modeled on the teacher's `BinanceClient`
/// request/response shape but with no network calls.
pub struct PaperBroker {
    next_order_id: AtomicU64,
    last_price: RwLock<Decimal>,
    positions: Arc<RwLock<Vec<BrokerPosition>>>,
    orders: Arc<RwLock<HashMap<String, BrokerOrderResult>>>,
    margin: Decimal,
}

impl PaperBroker {
    pub fn new(starting_margin: Decimal, seed_price: Decimal) -> Self {
        Self {
            next_order_id: AtomicU64::new(1),
            last_price: RwLock::new(seed_price),
            positions: Arc::new(RwLock::new(Vec::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            margin: starting_margin,
        }
    }

    pub async fn set_last_price(&self, price: Decimal) {
        *self.last_price.write().await = price;
    }

    fn next_id(&self) -> String {
        format!("PAPER-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn place_order(
        &self,
        contract: &OptionContract,
        txn: OrderTransaction,
        kind: OrderKind,
        lots: u32,
        price: Option<Decimal>,
    ) -> Result<BrokerOrderResult, AdapterError> {
        let fill_price = match kind {
            OrderKind::Limit => price.ok_or_else(|| {
                AdapterError::new(ErrorKind::Invalid, anyhow::anyhow!("limit order requires a price"))
            })?,
            OrderKind::Market => *self.last_price.read().await,
        };

        let mut positions = self.positions.write().await;
        let delta = match txn {
            OrderTransaction::Buy => lots as i64,
            OrderTransaction::Sell => -(lots as i64),
        };

        if let Some(existing) = positions
            .iter_mut()
            .find(|p| p.tradingsymbol == contract.tradingsymbol)
        {
            existing.qty_lots += delta;
        } else {
            positions.push(BrokerPosition {
                tradingsymbol: contract.tradingsymbol.clone(),
                side: contract.side,
                qty_lots: delta,
                average_price: fill_price,
            });
        }

        let result = BrokerOrderResult {
            order_id: self.next_id(),
            status: BrokerOrderStatus::Complete,
            filled_price: Some(fill_price),
            filled_qty_lots: lots,
        };
        self.orders
            .write()
            .await
            .insert(result.order_id.clone(), result.clone());
        Ok(result)
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<BrokerOrderResult, AdapterError> {
        match self.orders.read().await.get(order_id) {
            Some(result) => Ok(result.clone()),
            None => Ok(BrokerOrderResult {
                order_id: order_id.to_string(),
                status: BrokerOrderStatus::NotFound,
                filled_price: None,
                filled_qty_lots: 0,
            }),
        }
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, AdapterError> {
        Ok(self.positions.read().await.clone())
    }

    async fn get_option_price(&self, _contract: &OptionContract) -> Result<Decimal, AdapterError> {
        Ok(*self.last_price.read().await)
    }

    async fn get_available_margin(&self) -> Result<Decimal, AdapterError> {
        Ok(self.margin)
    }

    async fn get_option_expiries(&self, _underlying: Underlying) -> Result<Vec<NaiveDate>, AdapterError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contract() -> OptionContract {
        OptionContract::new(
            Underlying::Nifty,
            NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            crate::types::Strike(24800),
            Side::Ce,
        )
    }

    #[tokio::test]
    async fn market_buy_fills_at_last_price() {
        let broker = PaperBroker::new(dec!(100000), dec!(120));
        let result = broker
            .place_order(&contract(), OrderTransaction::Buy, OrderKind::Market, 1, None)
            .await
            .unwrap();
        assert_eq!(result.filled_price, Some(dec!(120)));
        assert_eq!(result.status, BrokerOrderStatus::Complete);

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].qty_lots, 1);
    }

    #[tokio::test]
    async fn limit_order_without_price_is_invalid() {
        let broker = PaperBroker::new(dec!(100000), dec!(120));
        let err = broker
            .place_order(&contract(), OrderTransaction::Buy, OrderKind::Limit, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn unknown_order_id_status_is_not_found() {
        let broker = PaperBroker::new(dec!(100000), dec!(120));
        let status = broker.get_order_status("PAPER-999").await.unwrap();
        assert_eq!(status.status, BrokerOrderStatus::NotFound);
    }

    #[tokio::test]
    async fn placed_order_status_is_queryable_by_id() {
        let broker = PaperBroker::new(dec!(100000), dec!(120));
        let placed = broker
            .place_order(&contract(), OrderTransaction::Buy, OrderKind::Market, 1, None)
            .await
            .unwrap();
        let status = broker.get_order_status(&placed.order_id).await.unwrap();
        assert_eq!(status.status, BrokerOrderStatus::Complete);
        assert_eq!(status.filled_price, Some(dec!(120)));
    }
}
