//! Strategy assembly: signals from the band engine become orders on the
//! execution engine, one candle at a time.

use crate::config::{AppConfig, StrategyConfig};
use crate::error::BotError;
use crate::execution::{ExecutionEngine, OrderBackend};
use crate::models::{Candle, OrderIntent, OrderResult};
use crate::strategy::{SignalAction, SignalEngine, TradeSignal, TrailingStopExit};
use crate::Result;

/// What happened on one bar
#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    pub signals: Vec<TradeSignal>,
    pub fills: Vec<OrderResult>,
    /// Orders rejected by the local ledger
    pub rejections: Vec<OrderResult>,
}

pub struct Trader {
    symbol: String,
    position_size_percent: f64,
    commission_rate: f64,
    signals: SignalEngine,
    engine: ExecutionEngine,
}

impl Trader {
    pub fn new(strategy: &StrategyConfig, commission_rate: f64, engine: ExecutionEngine) -> Self {
        let mut signals = SignalEngine::new(strategy.clone());
        if let Some(trailing) = strategy.trailing_exit {
            signals = signals.with_exit_policy(Box::new(TrailingStopExit::new(
                trailing.activation_percent,
                trailing.trail_percent,
            )));
        }

        Self {
            symbol: strategy.symbol.clone(),
            position_size_percent: strategy.position_size_percent,
            commission_rate,
            signals,
            engine,
        }
    }

    /// Trader over `backend` with capital and fees from `config`
    pub fn from_config(config: &AppConfig, backend: Box<dyn OrderBackend>) -> Self {
        let engine = ExecutionEngine::new(
            backend,
            config.execution.initial_capital,
            config.execution.commission_rate,
        );
        Self::new(&config.strategy, config.execution.commission_rate, engine)
    }

    /// Run one closed candle through signals and execution
    ///
    /// Ledger rejections are logged and skipped. Calculation, backend and
    /// cancellation errors are returned.
    pub async fn on_candle(&mut self, candle: &Candle) -> Result<BarOutcome> {
        let portfolio = self.engine.portfolio();
        let signals = self.signals.on_candle(candle, &portfolio)?;
        let mut outcome = BarOutcome::default();

        for signal in &signals {
            match signal.action {
                SignalAction::Buy => {
                    let quantity = portfolio.cash * self.position_size_percent
                        / (signal.price * (1.0 + self.commission_rate));
                    if !(quantity > 0.0) {
                        tracing::warn!("No cash to size entry at {:.4}", signal.price);
                        self.signals.clear_trade_state();
                        continue;
                    }

                    let intent = self.intent(signal, quantity);
                    match self.engine.buy(&intent).await {
                        Ok(result) => outcome.fills.push(result),
                        Err(e) if e.is_validation() => {
                            self.record_rejection(&e, &mut outcome);
                            self.signals.clear_trade_state();
                        }
                        Err(e) => {
                            self.signals.clear_trade_state();
                            return Err(e);
                        }
                    }
                }
                SignalAction::Sell => {
                    let quantity = self.engine.portfolio().position;
                    if quantity <= 0.0 {
                        tracing::warn!("Sell signal with no position held: {}", signal.reason);
                        continue;
                    }

                    let intent = self.intent(signal, quantity);
                    match self.engine.sell(&intent).await {
                        Ok(result) => outcome.fills.push(result),
                        Err(e) if e.is_validation() => {
                            self.record_rejection(&e, &mut outcome);
                            self.resume_position(candle.close);
                        }
                        Err(e) => {
                            self.resume_position(candle.close);
                            return Err(e);
                        }
                    }
                }
            }
        }

        if self.signals.state().has_open_position && !self.engine.portfolio().has_position() {
            tracing::debug!("Ledger holds no position, clearing trade state");
            self.signals.clear_trade_state();
        }

        self.engine.mark_to_market(candle.close, candle.close_time);
        outcome.signals = signals;
        Ok(outcome)
    }

    /// Fill the band window from closed history before trading live bars
    pub fn warm_up(&mut self, candles: &[Candle]) {
        self.signals.prime(candles);
        if let Some(last) = candles.last() {
            self.engine.mark_to_market(last.close, last.close_time);
        }
    }

    /// Sell whatever position is left at `price`, e.g. at the end of a backtest
    pub async fn liquidate(&mut self, price: f64, timestamp: i64) -> Result<Option<OrderResult>> {
        let quantity = self.engine.portfolio().position;
        if quantity <= 0.0 {
            return Ok(None);
        }

        let intent = OrderIntent {
            trading_pair: self.symbol.clone(),
            quantity,
            price,
            reason: "Closing open position".to_string(),
            timestamp,
        };
        let result = self.engine.sell(&intent).await?;
        self.signals.clear_trade_state();
        self.engine.mark_to_market(price, timestamp);
        Ok(Some(result))
    }

    fn intent(&self, signal: &TradeSignal, quantity: f64) -> OrderIntent {
        OrderIntent {
            trading_pair: self.symbol.clone(),
            quantity,
            price: signal.price,
            reason: signal.reason.clone(),
            timestamp: signal.timestamp,
        }
    }

    fn record_rejection(&self, error: &BotError, outcome: &mut BarOutcome) {
        tracing::warn!("Order rejected: {}", error);
        if let Some(result) = error.rejected_order() {
            outcome.rejections.push(result.clone());
        }
    }

    // Keep exits running for a position the ledger still holds
    fn resume_position(&mut self, price: f64) {
        if self.engine.portfolio().has_position() {
            let entry = self.engine.last_entry_price().unwrap_or(price);
            self.signals.adopt_position(entry, price);
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn signals(&self) -> &SignalEngine {
        &self.signals
    }
}
