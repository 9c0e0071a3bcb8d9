use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::exit_policy::{ExitPolicy, TradeInfo};
use crate::config::StrategyConfig;
use crate::indicators::{calculate_bands, BandResult};
use crate::models::{Candle, Portfolio};
use crate::Result;

// Extra closes kept beyond the band period
const HISTORY_HEADROOM: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub action: SignalAction,
    pub price: f64,
    pub reason: String,
    /// 0.0 to 1.0
    pub strength: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WarmingUp,
    Active,
    Cooldown,
}

/// Per-run bookkeeping, mutated once per bar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyState {
    pub price_history: VecDeque<f64>,
    pub current_bar: u64,
    /// None until the first trade
    pub last_trade_bar: Option<u64>,
    pub last_trade_price: f64,
    pub highest_price_since_entry: f64,
    pub has_open_position: bool,
}

/// Band-breakout state machine
///
/// Buys when the close touches the lower band with no position open, exits
/// on stop-loss, the configured exit policy, or (without a policy) a fixed
/// take-profit. Exits are evaluated every bar; entries are suppressed for
/// `cooldown_bars` bars after each trade.
pub struct SignalEngine {
    config: StrategyConfig,
    state: StrategyState,
    exit_policy: Option<Box<dyn ExitPolicy>>,
    last_bands: Option<BandResult>,
}

impl SignalEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            state: StrategyState::default(),
            exit_policy: None,
            last_bands: None,
        }
    }

    pub fn with_exit_policy(mut self, policy: Box<dyn ExitPolicy>) -> Self {
        self.exit_policy = Some(policy);
        self
    }

    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    /// Bands computed on the most recent active bar
    pub fn last_bands(&self) -> Option<&BandResult> {
        self.last_bands.as_ref()
    }

    pub fn phase(&self) -> Phase {
        if self.state.price_history.len() < self.config.period {
            Phase::WarmingUp
        } else if self.in_cooldown() {
            Phase::Cooldown
        } else {
            Phase::Active
        }
    }

    /// True for the `cooldown_bars` bars following the last trade bar
    fn in_cooldown(&self) -> bool {
        self.state
            .last_trade_bar
            .is_some_and(|last| self.state.current_bar - last <= self.config.cooldown_bars)
    }

    /// Process one closed candle and return the signals it produces
    pub fn on_candle(&mut self, candle: &Candle, portfolio: &Portfolio) -> Result<Vec<TradeSignal>> {
        let price = candle.close;
        self.record_close(price);

        if self.state.price_history.len() < self.config.period {
            tracing::debug!(
                "Warming up: {}/{} closes",
                self.state.price_history.len(),
                self.config.period
            );
            return Ok(Vec::new());
        }

        let bands = calculate_bands(
            self.state.price_history.make_contiguous(),
            self.config.period,
            self.config.multiplier,
        )?
        .at(candle.open_time);
        self.last_bands = Some(bands);

        if self.state.has_open_position {
            self.state.highest_price_since_entry = self.state.highest_price_since_entry.max(price);

            if let Some(exit) = self.evaluate_exit(candle) {
                self.close_trade();
                return Ok(vec![exit]);
            }
        }

        if self.in_cooldown() {
            tracing::debug!(
                "Cooldown: bar {} (last trade at bar {:?})",
                self.state.current_bar,
                self.state.last_trade_bar
            );
            return Ok(Vec::new());
        }

        if bands.is_lower_breakout() && !self.state.has_open_position && !portfolio.has_position() {
            let signal = TradeSignal {
                action: SignalAction::Buy,
                price,
                reason: format!(
                    "Close {:.4} at or below lower band {:.4} (middle {:.4})",
                    price, bands.lower, bands.middle
                ),
                strength: entry_strength(&bands),
                timestamp: candle.open_time,
            };

            self.state.last_trade_bar = Some(self.state.current_bar);
            self.state.last_trade_price = price;
            self.state.has_open_position = true;
            self.state.highest_price_since_entry = price;

            tracing::debug!("BUY signal: {}", signal.reason);
            return Ok(vec![signal]);
        }

        Ok(Vec::new())
    }

    /// Seed the price window from history without emitting signals
    pub fn prime(&mut self, candles: &[Candle]) {
        for candle in candles {
            self.record_close(candle.close);
        }
    }

    fn record_close(&mut self, price: f64) {
        self.state.current_bar += 1;

        let cap = self.config.period + HISTORY_HEADROOM;
        self.state.price_history.push_back(price);
        while self.state.price_history.len() > cap {
            self.state.price_history.pop_front();
        }
    }

    fn evaluate_exit(&mut self, candle: &Candle) -> Option<TradeSignal> {
        let price = candle.close;
        let entry = self.state.last_trade_price;
        if entry <= 0.0 {
            return None;
        }
        let pnl = (price - entry) / entry;

        let sell = |reason: String, strength: f64| TradeSignal {
            action: SignalAction::Sell,
            price,
            reason,
            strength,
            timestamp: candle.open_time,
        };

        if pnl <= -self.config.stop_loss_percent {
            tracing::debug!("Stop-loss hit at {:.4} ({:+.2}%)", price, pnl * 100.0);
            return Some(sell(
                format!("Stop-loss: {:+.2}% from entry {:.4}", pnl * 100.0, entry),
                1.0,
            ));
        }

        match self.exit_policy.as_mut() {
            Some(policy) => {
                let trade = TradeInfo {
                    entry_price: entry,
                    current_price: price,
                    current_pnl_percent: pnl,
                    highest_price_since_entry: self.state.highest_price_since_entry,
                };
                let decision = policy.should_sell(candle, &trade);
                if decision.should_sell {
                    tracing::debug!("Exit policy sell: {}", decision.reason);
                    return Some(sell(decision.reason, decision.strength));
                }
            }
            None if pnl >= self.config.take_profit_percent => {
                tracing::debug!("Take-profit hit at {:.4} ({:+.2}%)", price, pnl * 100.0);
                return Some(sell(
                    format!("Take-profit: {:+.2}% from entry {:.4}", pnl * 100.0, entry),
                    1.0,
                ));
            }
            None => {}
        }

        None
    }

    fn close_trade(&mut self) {
        self.state.last_trade_bar = Some(self.state.current_bar);
        self.state.last_trade_price = 0.0;
        self.state.has_open_position = false;
        self.state.highest_price_since_entry = 0.0;
        if let Some(policy) = self.exit_policy.as_mut() {
            policy.reset();
        }
    }

    /// Track a position the ledger still holds after a failed sell
    pub fn adopt_position(&mut self, entry_price: f64, current_price: f64) {
        self.state.has_open_position = true;
        self.state.last_trade_price = entry_price;
        self.state.highest_price_since_entry = entry_price.max(current_price);
    }

    /// Drop the open trade without recording a sell
    ///
    /// Used when an entry never filled or the position was closed outside
    /// the signal flow. `last_trade_bar` is kept, so cooldown still applies.
    pub fn clear_trade_state(&mut self) {
        self.state.last_trade_price = 0.0;
        self.state.has_open_position = false;
        self.state.highest_price_since_entry = 0.0;
        if let Some(policy) = self.exit_policy.as_mut() {
            policy.reset();
        }
    }
}

/// 0.5 at the lower band, rising to 1.0 one band-half below it
fn entry_strength(bands: &BandResult) -> f64 {
    let half_width = bands.middle - bands.lower;
    if half_width <= 0.0 {
        return 0.5;
    }
    let depth = (bands.lower - bands.price) / half_width;
    (0.5 + 0.5 * depth).clamp(0.5, 1.0)
}
