use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::OrderBackend;
use crate::api::{OrderRequest, RemoteFeed};
use crate::models::{OrderIntent, OrderResult, OrderSide, OrderType, Portfolio};
use crate::Result;

/// Forwards orders to the exchange as market orders
pub struct LiveBackend {
    feed: Arc<dyn RemoteFeed>,
    base_asset: String,
    quote_asset: String,
}

impl LiveBackend {
    /// # Arguments
    /// * `base_asset` - Asset being traded (position), e.g. "BTC"
    /// * `quote_asset` - Asset used as cash, e.g. "USDT"
    pub fn new(feed: Arc<dyn RemoteFeed>, base_asset: &str, quote_asset: &str) -> Self {
        Self {
            feed,
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
        }
    }

    async fn place(&self, intent: &OrderIntent, side: OrderSide) -> Result<OrderResult> {
        let request = OrderRequest {
            symbol: intent.trading_pair.clone(),
            side,
            order_type: OrderType::Market,
            quantity: intent.quantity,
            price: None,
        };

        tracing::info!(
            "Placing {} {} {:.8} @ market ({})",
            side.as_str(),
            intent.trading_pair,
            intent.quantity,
            intent.reason
        );

        let mut result = self.feed.place_order(&request).await?;
        if result.timestamp == 0 {
            result.timestamp = intent.timestamp;
        }
        Ok(result)
    }
}

#[async_trait]
impl OrderBackend for LiveBackend {
    async fn execute_buy(&self, intent: &OrderIntent) -> Result<OrderResult> {
        self.place(intent, OrderSide::Buy).await
    }

    async fn execute_sell(&self, intent: &OrderIntent) -> Result<OrderResult> {
        self.place(intent, OrderSide::Sell).await
    }

    /// Free balances of the base and quote asset
    ///
    /// Equity is reported as cash only; valuing the position needs a price.
    async fn get_real_portfolio(&self) -> Result<Portfolio> {
        let balances = self.feed.get_balances().await?;
        let free = |asset: &str| {
            balances
                .iter()
                .find(|b| b.asset == asset)
                .map(|b| b.free)
                .unwrap_or(0.0)
        };

        let cash = free(&self.quote_asset);
        Ok(Portfolio {
            cash,
            position: free(&self.base_asset),
            equity: cash,
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BinanceClient;
    use crate::config::ExchangeConfig;
    use crate::execution::ExecutionEngine;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> Arc<dyn RemoteFeed> {
        let config = ExchangeConfig {
            base_url: server.url(),
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            ..Default::default()
        };
        Arc::new(BinanceClient::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_buy_is_sent_as_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quantity".into(), "0.5".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"symbol":"BTCUSDT","orderId":42,"status":"FILLED",
                    "executedQty":"0.50000000","cummulativeQuoteQty":"15005.00000000",
                    "transactTime":1700000000000}"#,
            )
            .create_async()
            .await;

        let backend = LiveBackend::new(client(&server), "BTC", "USDT");
        let intent = OrderIntent {
            trading_pair: "BTCUSDT".to_string(),
            quantity: 0.5,
            price: 30000.0,
            reason: "lower band".to_string(),
            timestamp: 1,
        };
        let result = backend.execute_buy(&intent).await.unwrap();

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.order_id, "42");
        assert!((result.price - 30010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_real_portfolio_from_balances() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"balances":[
                    {"asset":"BTC","free":"0.25","locked":"0.0"},
                    {"asset":"USDT","free":"1234.5","locked":"10.0"},
                    {"asset":"ETH","free":"3.0","locked":"0.0"}
                ]}"#,
            )
            .create_async()
            .await;

        let backend = LiveBackend::new(client(&server), "BTC", "USDT");
        let portfolio = backend.get_real_portfolio().await.unwrap();

        assert_eq!(portfolio.position, 0.25);
        assert_eq!(portfolio.cash, 1234.5);
        assert_eq!(portfolio.equity, 1234.5);
    }

    #[tokio::test]
    async fn test_partially_filled_buy_books_executed_quantity() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::UrlEncoded("quantity".into(), "0.5".into()))
            .with_status(200)
            .with_body(
                r#"{"symbol":"BTCUSDT","orderId":43,"status":"PARTIALLY_FILLED",
                    "executedQty":"0.25000000","cummulativeQuoteQty":"7502.50000000",
                    "transactTime":1700000000000}"#,
            )
            .create_async()
            .await;

        let backend = LiveBackend::new(client(&server), "BTC", "USDT");
        let mut engine = ExecutionEngine::new(Box::new(backend), 100_000.0, 0.0);
        let intent = OrderIntent {
            trading_pair: "BTCUSDT".to_string(),
            quantity: 0.5,
            price: 30000.0,
            reason: "lower band".to_string(),
            timestamp: 1,
        };

        let result = engine.buy(&intent).await.unwrap();

        assert_eq!(result.quantity, 0.25);
        let portfolio = engine.portfolio();
        assert_eq!(portfolio.position, 0.25);
        assert!((portfolio.cash - 92_497.5).abs() < 1e-9);
    }
}
