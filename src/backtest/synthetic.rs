use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::api::{OrderRequest, RemoteFeed};
use crate::error::BotError;
use crate::models::{AccountBalance, Candle, OrderResult, Timeframe};
use crate::Result;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Sideways/choppy market (±1% around mean)
    Sideways,
    /// High volatility (±5% large swings)
    Volatile,
    /// Contains time gaps (missing candles)
    WithGaps,
    /// Mild growth, then a 25% slide over the second half
    Crash,
}

/// Generates synthetic price data for backtesting
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 1_000.0,
        }
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    /// Generate candles for a specific market scenario
    ///
    /// # Arguments
    /// * `start_time` - open_time of the first candle, epoch millis
    /// * `num_candles` - Candle slots to cover; `WithGaps` leaves some empty
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        symbol: &str,
        timeframe: Timeframe,
        start_time: i64,
        num_candles: usize,
    ) -> Vec<Candle> {
        let interval = timeframe.interval_ms();
        let bars_per_day = (86_400_000 / interval).max(1) as f64;
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut slot = 0i64;

        for i in 0..num_candles {
            // Skip every 50th candle to create gaps
            if scenario == MarketScenario::WithGaps && i % 50 == 49 {
                slot += 2;
                continue;
            }

            price = self.step(scenario, price, i, num_candles, bars_per_day);
            let open_time = start_time + slot * interval;
            candles.push(self.create_candle(symbol, timeframe, open_time, interval, price));
            slot += 1;
        }

        candles
    }

    /// Next close for the scenario
    fn step(
        &mut self,
        scenario: MarketScenario,
        price: f64,
        index: usize,
        total: usize,
        bars_per_day: f64,
    ) -> f64 {
        match scenario {
            MarketScenario::Uptrend | MarketScenario::Downtrend => {
                let daily = if scenario == MarketScenario::Uptrend { 0.02 } else { -0.02 };
                // Reduced noise so the trend dominates
                let drift = price * daily / bars_per_day;
                let noise = price * self.rng.gen_range(-0.001..0.001);
                price + drift + noise
            }
            MarketScenario::Sideways => {
                let reversion = (self.base_price - price) * 0.1;
                let noise = price * self.rng.gen_range(-0.01..0.01);
                price + reversion + noise
            }
            MarketScenario::Volatile => {
                let next = price + price * self.rng.gen_range(-0.05..0.05);
                next.max(self.base_price * 0.5)
            }
            MarketScenario::WithGaps => price + price * self.rng.gen_range(-0.01..0.01),
            MarketScenario::Crash => {
                if index < total / 2 {
                    price + price * self.rng.gen_range(-0.005..0.01)
                } else {
                    let drop = price * -0.25 / (total as f64 / 2.0);
                    let noise = price * self.rng.gen_range(-0.005..0.005);
                    price + drop + noise
                }
            }
        }
    }

    fn create_candle(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: i64,
        interval: i64,
        price: f64,
    ) -> Candle {
        let noise_pct = 0.002; // ±0.2% intrabar movement

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);

        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);
        let taker_share = self.rng.gen_range(0.4..0.6);

        Candle {
            symbol: symbol.to_string(),
            timeframe: timeframe.as_str().to_string(),
            open_time,
            close_time: open_time + interval - 1,
            open,
            high,
            low,
            close: price,
            volume,
            quote_volume: volume * price,
            taker_buy_volume: volume * taker_share,
            taker_buy_quote_volume: volume * taker_share * price,
        }
    }
}

/// Remote feed serving a pre-generated series
///
/// Market data only; orders are refused.
pub struct SyntheticFeed {
    candles: Vec<Candle>,
}

impl SyntheticFeed {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        Self { candles }
    }

    pub fn generate(
        seed: u64,
        scenario: MarketScenario,
        symbol: &str,
        timeframe: Timeframe,
        start_time: i64,
        num_candles: usize,
    ) -> Self {
        let candles = SyntheticDataGenerator::new(seed).generate(
            scenario,
            symbol,
            timeframe,
            start_time,
            num_candles,
        );
        Self::new(candles)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }
}

#[async_trait]
impl RemoteFeed for SyntheticFeed {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let matching = self.candles.iter().filter(|c| {
            c.symbol == symbol
                && c.timeframe == timeframe
                && start.map_or(true, |s| c.open_time >= s)
                && end.map_or(true, |e| c.open_time <= e)
        });

        // Like the exchange: from `start` forward, else the most recent
        let candles = if start.is_some() {
            matching.take(limit).cloned().collect()
        } else {
            let mut recent: Vec<Candle> = matching.rev().take(limit).cloned().collect();
            recent.reverse();
            recent
        };
        Ok(candles)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        Err(BotError::Backend(format!(
            "synthetic feed cannot place {} order for {}",
            request.side.as_str(),
            request.symbol
        )))
    }

    async fn get_balances(&self) -> Result<Vec<AccountBalance>> {
        Ok(Vec::new())
    }
}
