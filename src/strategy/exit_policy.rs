use crate::models::Candle;

/// Open trade as seen by an exit policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeInfo {
    pub entry_price: f64,
    pub current_price: f64,
    /// Fraction, e.g. 0.02 = +2%
    pub current_pnl_percent: f64,
    pub highest_price_since_entry: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub should_sell: bool,
    pub reason: String,
    /// 0.0 to 1.0
    pub strength: f64,
}

impl ExitDecision {
    pub fn hold() -> Self {
        Self {
            should_sell: false,
            reason: String::new(),
            strength: 0.0,
        }
    }

    pub fn sell(reason: String, strength: f64) -> Self {
        Self {
            should_sell: true,
            reason,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

/// Pluggable exit rule consulted every bar while a position is open
pub trait ExitPolicy: Send {
    fn should_sell(&mut self, candle: &Candle, trade: &TradeInfo) -> ExitDecision;

    /// Called after every sell
    fn reset(&mut self);
}

/// Trailing stop that arms once the trade is up `activation_percent`
///
/// When armed, exits as soon as price falls `trail_percent` below the
/// highest price seen since entry.
#[derive(Debug, Clone)]
pub struct TrailingStopExit {
    activation_percent: f64,
    trail_percent: f64,
    armed: bool,
}

impl TrailingStopExit {
    pub fn new(activation_percent: f64, trail_percent: f64) -> Self {
        Self {
            activation_percent,
            trail_percent,
            armed: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl ExitPolicy for TrailingStopExit {
    fn should_sell(&mut self, _candle: &Candle, trade: &TradeInfo) -> ExitDecision {
        if trade.entry_price <= 0.0 || trade.highest_price_since_entry <= 0.0 {
            return ExitDecision::hold();
        }

        let peak_gain = (trade.highest_price_since_entry - trade.entry_price) / trade.entry_price;
        if !self.armed && peak_gain >= self.activation_percent {
            tracing::debug!(
                "Trailing stop armed at {:.4} (+{:.2}%)",
                trade.highest_price_since_entry,
                peak_gain * 100.0
            );
            self.armed = true;
        }

        if !self.armed {
            return ExitDecision::hold();
        }

        let drawdown = (trade.highest_price_since_entry - trade.current_price)
            / trade.highest_price_since_entry;
        if drawdown < self.trail_percent {
            return ExitDecision::hold();
        }

        // Half strength at the trail line, full at twice the trail
        let strength = if self.trail_percent > 0.0 {
            0.5 * drawdown / self.trail_percent
        } else {
            1.0
        };

        ExitDecision::sell(
            format!(
                "Trailing stop: {:.2}% below high {:.4} (P&L {:+.2}%)",
                drawdown * 100.0,
                trade.highest_price_since_entry,
                trade.current_pnl_percent * 100.0
            ),
            strength,
        )
    }

    fn reset(&mut self) {
        self.armed = false;
    }
}
