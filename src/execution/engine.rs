use serde::{Deserialize, Serialize};

use super::OrderBackend;
use crate::error::BotError;
use crate::models::{OrderIntent, OrderResult, OrderSide, Portfolio, TradeStatistics};
use crate::sync::SyncContext;
use crate::Result;

// Position left over from float rounding after a full sell
const POSITION_DUST: f64 = 1e-12;

/// Snapshot of trading performance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub trades: TradeStatistics,
    pub initial_capital: f64,
    pub equity: f64,
    pub win_rate: f64,
    /// (equity - initial_capital) / initial_capital, 0 without capital
    pub total_return: f64,
}

/// Cash/position ledger in front of an order backend
///
/// Every order is validated against the local ledger first. The ledger
/// only changes after the backend reports a successful fill.
pub struct ExecutionEngine {
    backend: Box<dyn OrderBackend>,
    ctx: SyncContext,
    portfolio: Portfolio,
    initial_capital: f64,
    commission_rate: f64,
    order_history: Vec<OrderResult>,
    stats: TradeStatistics,
}

impl ExecutionEngine {
    pub fn new(backend: Box<dyn OrderBackend>, initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            backend,
            ctx: SyncContext::new(),
            portfolio: Portfolio::new(initial_capital),
            initial_capital,
            commission_rate,
            order_history: Vec::new(),
            stats: TradeStatistics::default(),
        }
    }

    /// Race every backend call against `ctx`
    pub fn with_context(mut self, ctx: SyncContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub async fn buy(&mut self, intent: &OrderIntent) -> Result<OrderResult> {
        let notional = intent.quantity * intent.price;
        let commission = notional * self.commission_rate;
        let total_cost = notional + commission;

        if self.portfolio.cash < total_cost {
            tracing::warn!(
                "Rejected buy {:.8} {} @ {:.4}: need {:.4}, have {:.4}",
                intent.quantity,
                intent.trading_pair,
                intent.price,
                total_cost,
                self.portfolio.cash
            );
            return Err(BotError::InsufficientCash {
                required: total_cost,
                available: self.portfolio.cash,
                result: Box::new(OrderResult::rejected(intent, OrderSide::Buy, "insufficient cash")),
            });
        }

        let mut result = self
            .ctx
            .run("execute buy", self.backend.execute_buy(intent))
            .await?;
        ensure_filled(&result)?;

        // A short fill is booked at what the backend actually executed
        let (quantity, price, commission, total_cost) = match partial_fill(intent, &result) {
            Some(filled) => {
                let notional = filled * result.price;
                let commission = notional * self.commission_rate;
                (filled, result.price, commission, notional + commission)
            }
            None => (intent.quantity, intent.price, commission, total_cost),
        };

        result.commission = commission;
        self.portfolio.cash -= total_cost;
        self.portfolio.position += quantity;
        self.portfolio.equity = self.portfolio.cash + self.portfolio.position * price;
        self.portfolio.timestamp = intent.timestamp;
        self.stats.total_commission += commission;

        tracing::info!(
            "BUY {:.8} {} @ {:.4} (fee {:.4}) - {}",
            quantity,
            intent.trading_pair,
            price,
            commission,
            intent.reason
        );

        self.order_history.push(result.clone());
        Ok(result)
    }

    pub async fn sell(&mut self, intent: &OrderIntent) -> Result<OrderResult> {
        if self.portfolio.position < intent.quantity {
            tracing::warn!(
                "Rejected sell {:.8} {}: position is {:.8}",
                intent.quantity,
                intent.trading_pair,
                self.portfolio.position
            );
            return Err(BotError::InsufficientPosition {
                required: intent.quantity,
                available: self.portfolio.position,
                result: Box::new(OrderResult::rejected(
                    intent,
                    OrderSide::Sell,
                    "insufficient position",
                )),
            });
        }

        let mut result = self
            .ctx
            .run("execute sell", self.backend.execute_sell(intent))
            .await?;
        ensure_filled(&result)?;

        // The backend's execution price may differ from the requested one
        let price = result.price;
        let quantity = partial_fill(intent, &result).unwrap_or(intent.quantity);
        let notional = quantity * price;
        let commission = notional * self.commission_rate;

        self.portfolio.cash += notional - commission;
        self.portfolio.position -= quantity;
        if self.portfolio.position.abs() < POSITION_DUST {
            self.portfolio.position = 0.0;
        }

        match self.last_entry_price() {
            Some(entry_price) => {
                let pnl = quantity * (price - entry_price);
                self.stats.total_trades += 1;
                self.stats.realized_pnl += pnl;
                if pnl > 0.0 {
                    self.stats.winning_trades += 1;
                } else {
                    self.stats.losing_trades += 1;
                }
                tracing::info!(
                    "SELL {:.8} {} @ {:.4} (entry {:.4}, P&L {:+.4}) - {}",
                    quantity,
                    intent.trading_pair,
                    price,
                    entry_price,
                    pnl,
                    intent.reason
                );
            }
            None => tracing::warn!(
                "SELL {} @ {:.4} without a recorded buy, P&L not tracked",
                intent.trading_pair,
                price
            ),
        }

        self.portfolio.equity = self.portfolio.cash + self.portfolio.position * price;
        self.portfolio.timestamp = intent.timestamp;
        result.commission = commission;
        self.stats.total_commission += commission;

        self.order_history.push(result.clone());
        Ok(result)
    }

    /// Local ledger snapshot
    pub fn portfolio(&self) -> Portfolio {
        self.portfolio.clone()
    }

    /// Holdings as reported by the backend, without touching the ledger
    pub async fn real_portfolio(&self) -> Result<Portfolio> {
        self.ctx
            .run("backend portfolio", self.backend.get_real_portfolio())
            .await
    }

    /// Revalue the open position at `price`
    pub fn mark_to_market(&mut self, price: f64, timestamp: i64) {
        self.portfolio.equity = self.portfolio.cash + self.portfolio.position * price;
        self.portfolio.timestamp = timestamp;
    }

    pub fn statistics(&self) -> PerformanceSummary {
        let total_return = if self.initial_capital == 0.0 {
            0.0
        } else {
            (self.portfolio.equity - self.initial_capital) / self.initial_capital
        };

        PerformanceSummary {
            trades: self.stats.clone(),
            initial_capital: self.initial_capital,
            equity: self.portfolio.equity,
            win_rate: self.stats.win_rate(),
            total_return,
        }
    }

    pub fn order_history(&self) -> &[OrderResult] {
        &self.order_history
    }

    /// Price of the most recent filled buy
    pub fn last_entry_price(&self) -> Option<f64> {
        self.order_history
            .iter()
            .rev()
            .find(|order| order.side == OrderSide::Buy)
            .map(|order| order.price)
    }
}

/// Executed quantity when the backend filled less than requested
fn partial_fill(intent: &OrderIntent, result: &OrderResult) -> Option<f64> {
    (result.quantity > 0.0 && result.quantity < intent.quantity).then(|| {
        tracing::warn!(
            "Partial {} fill on {}: {:.8} of {:.8}",
            result.side.as_str(),
            intent.trading_pair,
            result.quantity,
            intent.quantity
        );
        result.quantity
    })
}

fn ensure_filled(result: &OrderResult) -> Result<()> {
    if result.success {
        Ok(())
    } else {
        Err(BotError::Backend(
            result
                .error
                .clone()
                .unwrap_or_else(|| format!("order {} not filled", result.order_id)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SimulatedBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn intent(quantity: f64, price: f64) -> OrderIntent {
        OrderIntent {
            trading_pair: "ETHUSDT".to_string(),
            quantity,
            price,
            reason: "test".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    fn engine(capital: f64, commission_rate: f64) -> ExecutionEngine {
        ExecutionEngine::new(
            Box::new(SimulatedBackend::new(capital, commission_rate)),
            capital,
            commission_rate,
        )
    }

    /// Backend that counts calls and fills sells at a fixed price
    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        sell_price: f64,
        fail: bool,
    }

    #[async_trait]
    impl OrderBackend for CountingBackend {
        async fn execute_buy(&self, intent: &OrderIntent) -> Result<OrderResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BotError::Backend("exchange down".to_string()));
            }
            Ok(OrderResult {
                order_id: "b".to_string(),
                trading_pair: intent.trading_pair.clone(),
                side: OrderSide::Buy,
                quantity: intent.quantity,
                price: intent.price,
                commission: 0.0,
                timestamp: intent.timestamp,
                success: true,
                error: None,
            })
        }

        async fn execute_sell(&self, intent: &OrderIntent) -> Result<OrderResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OrderResult {
                order_id: "s".to_string(),
                trading_pair: intent.trading_pair.clone(),
                side: OrderSide::Sell,
                quantity: intent.quantity,
                price: self.sell_price,
                commission: 0.0,
                timestamp: intent.timestamp,
                success: true,
                error: None,
            })
        }

        async fn get_real_portfolio(&self) -> Result<Portfolio> {
            Ok(Portfolio::new(0.0))
        }
    }

    #[tokio::test]
    async fn test_buy_debits_cash_and_commission() {
        let mut engine = engine(100.0, 0.01);

        let result = engine.buy(&intent(1.0, 50.0)).await.unwrap();

        assert!(result.success);
        assert!((result.commission - 0.5).abs() < 1e-9);
        let portfolio = engine.portfolio();
        assert!((portfolio.cash - 49.5).abs() < 1e-9);
        assert_eq!(portfolio.position, 1.0);
        assert_eq!(engine.order_history().len(), 1);
        assert!((engine.statistics().trades.total_commission - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_buy_rejected_without_cash() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = ExecutionEngine::new(
            Box::new(CountingBackend {
                calls: calls.clone(),
                sell_price: 0.0,
                fail: false,
            }),
            40.0,
            0.01,
        );

        let err = engine.buy(&intent(1.0, 50.0)).await.unwrap_err();

        assert!(err.is_validation());
        let rejected = err.rejected_order().unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.error.as_deref(), Some("insufficient cash"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.portfolio().cash, 40.0);
        assert_eq!(engine.portfolio().position, 0.0);
        assert!(engine.order_history().is_empty());
    }

    #[tokio::test]
    async fn test_sell_rejected_without_position() {
        let mut engine = engine(100.0, 0.0);

        let err = engine.sell(&intent(1.0, 50.0)).await.unwrap_err();

        assert!(matches!(err, BotError::InsufficientPosition { .. }));
        assert_eq!(
            err.rejected_order().unwrap().error.as_deref(),
            Some("insufficient position")
        );
        assert_eq!(engine.portfolio().cash, 100.0);
    }

    #[tokio::test]
    async fn test_round_trip_win() {
        let mut engine = engine(1000.0, 0.0);
        engine.buy(&intent(1.0, 100.0)).await.unwrap();
        engine.sell(&intent(1.0, 110.0)).await.unwrap();

        let summary = engine.statistics();
        assert_eq!(summary.trades.total_trades, 1);
        assert_eq!(summary.trades.winning_trades, 1);
        assert_eq!(summary.trades.losing_trades, 0);
        assert!((summary.trades.realized_pnl - 10.0).abs() < 1e-9);
        assert!((summary.equity - 1010.0).abs() < 1e-9);
        assert!((summary.total_return - 0.01).abs() < 1e-9);
        assert_eq!(engine.portfolio().position, 0.0);
    }

    #[tokio::test]
    async fn test_sell_uses_backend_execution_price() {
        let mut engine = ExecutionEngine::new(
            Box::new(CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                sell_price: 95.0,
                fail: false,
            }),
            1000.0,
            0.01,
        );
        engine.buy(&intent(2.0, 100.0)).await.unwrap();
        let result = engine.sell(&intent(2.0, 110.0)).await.unwrap();

        assert_eq!(result.price, 95.0);
        assert!((result.commission - 1.9).abs() < 1e-9);
        // 1000 - 202 + 190 - 1.9
        assert!((engine.portfolio().cash - 986.1).abs() < 1e-9);

        let stats = engine.statistics().trades;
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.realized_pnl + 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backend_error_leaves_ledger_untouched() {
        let mut engine = ExecutionEngine::new(
            Box::new(CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                sell_price: 0.0,
                fail: true,
            }),
            1000.0,
            0.001,
        );

        let err = engine.buy(&intent(1.0, 100.0)).await.unwrap_err();

        assert!(matches!(err, BotError::Backend(_)));
        assert_eq!(engine.portfolio(), Portfolio::new(1000.0));
        assert!(engine.order_history().is_empty());
    }

    #[tokio::test]
    async fn test_mark_to_market_and_zero_capital_return() {
        let mut engine = engine(1000.0, 0.0);
        engine.buy(&intent(2.0, 100.0)).await.unwrap();
        engine.mark_to_market(150.0, 5);

        assert!((engine.portfolio().equity - 1100.0).abs() < 1e-9);
        assert_eq!(engine.portfolio().timestamp, 5);

        assert_eq!(self::engine(0.0, 0.0).statistics().total_return, 0.0);
    }

    /// Backend that only ever fills half of what is asked, at a fixed price
    struct HalfFillBackend {
        price: f64,
    }

    impl HalfFillBackend {
        fn fill(&self, intent: &OrderIntent, side: OrderSide) -> OrderResult {
            OrderResult {
                order_id: "half".to_string(),
                trading_pair: intent.trading_pair.clone(),
                side,
                quantity: intent.quantity / 2.0,
                price: self.price,
                commission: 0.0,
                timestamp: intent.timestamp,
                success: true,
                error: None,
            }
        }
    }

    #[async_trait]
    impl OrderBackend for HalfFillBackend {
        async fn execute_buy(&self, intent: &OrderIntent) -> Result<OrderResult> {
            Ok(self.fill(intent, OrderSide::Buy))
        }

        async fn execute_sell(&self, intent: &OrderIntent) -> Result<OrderResult> {
            Ok(self.fill(intent, OrderSide::Sell))
        }

        async fn get_real_portfolio(&self) -> Result<Portfolio> {
            Ok(Portfolio::new(0.0))
        }
    }

    #[tokio::test]
    async fn test_partial_fills_book_executed_quantity() {
        let mut engine =
            ExecutionEngine::new(Box::new(HalfFillBackend { price: 101.0 }), 1000.0, 0.01);

        let bought = engine.buy(&intent(4.0, 100.0)).await.unwrap();

        assert_eq!(bought.quantity, 2.0);
        // 2 @ 101 plus 1% fee
        assert!((bought.commission - 2.02).abs() < 1e-9);
        assert_eq!(engine.portfolio().position, 2.0);
        assert!((engine.portfolio().cash - 795.98).abs() < 1e-9);

        engine.sell(&intent(2.0, 101.0)).await.unwrap();

        assert_eq!(engine.portfolio().position, 1.0);
        let stats = engine.statistics().trades;
        assert_eq!(stats.total_trades, 1);
        assert!(stats.realized_pnl.abs() < 1e-9);
    }
}
