use crate::backtest::metrics::{BacktestMetrics, EquityPoint};
use crate::config::AppConfig;
use crate::error::BotError;
use crate::execution::SimulatedBackend;
use crate::models::Candle;
use crate::trader::Trader;
use crate::Result;

/// Replays a candle series through a trader on the simulated backend
pub struct BacktestRunner {
    config: AppConfig,
}

impl BacktestRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run a backtest over `candles` (ascending, closed bars)
    ///
    /// Any position still open after the last candle is closed at its price.
    pub async fn run(&self, candles: &[Candle]) -> Result<BacktestMetrics> {
        let needed = self.config.strategy.period;
        let Some(last) = candles.last().filter(|_| candles.len() >= needed) else {
            return Err(BotError::InsufficientData {
                needed,
                got: candles.len(),
            });
        };

        tracing::info!(
            "Starting backtest: {} {} candles for {}, period {}",
            candles.len(),
            self.config.strategy.timeframe,
            self.config.strategy.symbol,
            needed
        );

        let execution = &self.config.execution;
        let backend = SimulatedBackend::new(execution.initial_capital, execution.commission_rate);
        let mut trader = Trader::from_config(&self.config, Box::new(backend));

        let mut equity_curve = Vec::with_capacity(candles.len());
        let mut rejected_orders = 0;

        for candle in candles {
            let outcome = trader.on_candle(candle).await?;
            rejected_orders += outcome.rejections.len();
            equity_curve.push(EquityPoint {
                timestamp: candle.close_time,
                equity: trader.engine().portfolio().equity,
            });
        }

        if let Some(result) = trader.liquidate(last.close, last.close_time).await? {
            tracing::debug!("Closed remaining {:.8} @ {:.4}", result.quantity, result.price);
            if let Some(point) = equity_curve.last_mut() {
                point.equity = trader.engine().portfolio().equity;
            }
        }

        let metrics = BacktestMetrics::from_run(
            &trader.engine().statistics(),
            trader.engine().order_history(),
            equity_curve,
            rejected_orders,
        );

        tracing::info!(
            "Backtest complete: {} trades, P&L: ${:.2} ({:+.2}%)",
            metrics.total_trades,
            metrics.total_pnl,
            metrics.total_return_pct
        );

        Ok(metrics)
    }
}
