use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::BotError;
use crate::models::{OrderIntent, OrderResult, OrderSide, Portfolio};
use crate::Result;

/// Physical order placement behind the execution engine
#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn execute_buy(&self, intent: &OrderIntent) -> Result<OrderResult>;

    async fn execute_sell(&self, intent: &OrderIntent) -> Result<OrderResult>;

    /// Holdings as the backend itself sees them
    async fn get_real_portfolio(&self) -> Result<Portfolio>;
}

/// Paper trading backend: every order fills at its requested price
pub struct SimulatedBackend {
    commission_rate: f64,
    holdings: Mutex<Portfolio>,
}

impl SimulatedBackend {
    pub fn new(initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            commission_rate,
            holdings: Mutex::new(Portfolio::new(initial_capital)),
        }
    }

    fn fill(&self, intent: &OrderIntent, side: OrderSide) -> Result<OrderResult> {
        let notional = intent.quantity * intent.price;
        let commission = notional * self.commission_rate;

        let mut holdings = self
            .holdings
            .lock()
            .map_err(|e| BotError::Backend(format!("simulated holdings poisoned: {}", e)))?;
        match side {
            OrderSide::Buy => {
                holdings.cash -= notional + commission;
                holdings.position += intent.quantity;
            }
            OrderSide::Sell => {
                holdings.cash += notional - commission;
                holdings.position = (holdings.position - intent.quantity).max(0.0);
            }
        }
        holdings.equity = holdings.cash + holdings.position * intent.price;
        holdings.timestamp = intent.timestamp;

        Ok(OrderResult {
            order_id: Uuid::new_v4().to_string(),
            trading_pair: intent.trading_pair.clone(),
            side,
            quantity: intent.quantity,
            price: intent.price,
            commission,
            timestamp: intent.timestamp,
            success: true,
            error: None,
        })
    }
}

#[async_trait]
impl OrderBackend for SimulatedBackend {
    async fn execute_buy(&self, intent: &OrderIntent) -> Result<OrderResult> {
        self.fill(intent, OrderSide::Buy)
    }

    async fn execute_sell(&self, intent: &OrderIntent) -> Result<OrderResult> {
        self.fill(intent, OrderSide::Sell)
    }

    async fn get_real_portfolio(&self) -> Result<Portfolio> {
        self.holdings
            .lock()
            .map(|holdings| holdings.clone())
            .map_err(|e| BotError::Backend(format!("simulated holdings poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(quantity: f64, price: f64) -> OrderIntent {
        OrderIntent {
            trading_pair: "BTCUSDT".to_string(),
            quantity,
            price,
            reason: "test".to_string(),
            timestamp: 1_000,
        }
    }

    #[tokio::test]
    async fn test_fills_at_requested_price() {
        let backend = SimulatedBackend::new(1000.0, 0.0);
        let result = backend.execute_buy(&intent(2.0, 50.0)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.side, OrderSide::Buy);
        assert_eq!(result.price, 50.0);
        assert_eq!(result.quantity, 2.0);
        assert!(Uuid::parse_str(&result.order_id).is_ok());
    }

    #[tokio::test]
    async fn test_tracks_holdings() {
        let backend = SimulatedBackend::new(1000.0, 0.01);
        backend.execute_buy(&intent(2.0, 100.0)).await.unwrap();

        let holdings = backend.get_real_portfolio().await.unwrap();
        assert_eq!(holdings.position, 2.0);
        assert!((holdings.cash - 798.0).abs() < 1e-9);

        backend.execute_sell(&intent(2.0, 110.0)).await.unwrap();
        let holdings = backend.get_real_portfolio().await.unwrap();
        assert_eq!(holdings.position, 0.0);
        assert!((holdings.cash - (798.0 + 220.0 - 2.2)).abs() < 1e-9);
    }
}
