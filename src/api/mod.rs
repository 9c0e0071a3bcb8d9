pub mod binance;

use async_trait::async_trait;

use crate::models::{AccountBalance, Candle, OrderResult, OrderSide, OrderType};
use crate::Result;

pub use binance::BinanceClient;

/// Order as sent to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Required for limit orders
    pub price: Option<f64>,
}

/// Remote market data + order endpoint
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// Candles ascending by open_time, optionally bounded by open_time
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    async fn get_balances(&self) -> Result<Vec<AccountBalance>>;
}
