pub mod timeframe;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use timeframe::Timeframe;

/// OHLCV candlestick data
///
/// Uniquely identified by (symbol, timeframe, open_time). Times are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
}

impl Candle {
    pub fn open_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }

    /// True when every stored field matches `other`. Used by stores to skip no-op upserts.
    pub fn same_values(&self, other: &Candle) -> bool {
        self.close_time == other.close_time
            && self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
            && self.quote_volume == other.quote_volume
            && self.taker_buy_volume == other.taker_buy_volume
            && self.taker_buy_quote_volume == other.taker_buy_quote_volume
    }
}

/// Missing candle interval, inclusive millisecond bounds on open_time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// Cash/position ledger snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub position: f64,
    pub equity: f64,
    pub timestamp: i64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            position: 0.0,
            equity: cash,
            timestamp: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Buy or sell request handed to the execution engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderIntent {
    pub trading_pair: String,
    pub quantity: f64,
    pub price: f64,
    pub reason: String,
    pub timestamp: i64,
}

/// Outcome of an order, successful or not
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResult {
    pub order_id: String,
    pub trading_pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub timestamp: i64,
    pub success: bool,
    pub error: Option<String>,
}

impl OrderResult {
    /// Failed result for an order that never left the engine
    pub fn rejected(intent: &OrderIntent, side: OrderSide, error: &str) -> Self {
        Self {
            order_id: String::new(),
            trading_pair: intent.trading_pair.clone(),
            side,
            quantity: intent.quantity,
            price: intent.price,
            commission: 0.0,
            timestamp: intent.timestamp,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeStatistics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_commission: f64,
    pub realized_pnl: f64,
}

impl TradeStatistics {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }
}

/// Exchange account balance for one asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}
