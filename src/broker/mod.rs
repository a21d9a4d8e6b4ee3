pub mod paper;

pub use paper::PaperBroker;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::types::{OptionContract, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTransaction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    Pending,
    Open,
    Complete,
    Filled,
    Rejected,
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderResult {
    pub order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_price: Option<Decimal>,
    pub filled_qty_lots: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub tradingsymbol: String,
    pub side: Side,
    pub qty_lots: i64,
    pub average_price: Decimal,
}

/// The broker-facing contract (§6.1). Every call has a caller-side ~30s
/// deadline (§5); implementations classify failures via `AdapterError`'s
/// `ErrorKind` so callers can decide whether to retry.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn place_order(
        &self,
        contract: &OptionContract,
        txn: OrderTransaction,
        kind: OrderKind,
        lots: u32,
        price: Option<Decimal>,
    ) -> Result<BrokerOrderResult, AdapterError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), AdapterError>;

    async fn get_order_status(&self, order_id: &str) -> Result<BrokerOrderResult, AdapterError>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, AdapterError>;

    async fn get_option_price(&self, contract: &OptionContract) -> Result<Decimal, AdapterError>;

    async fn get_available_margin(&self) -> Result<Decimal, AdapterError>;

    async fn get_option_expiries(&self, underlying: crate::types::Underlying) -> Result<Vec<NaiveDate>, AdapterError>;
}
