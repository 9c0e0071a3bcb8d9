use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::CandleStore;
use crate::error::BotError;
use crate::models::Candle;
use crate::Result;

type SeriesKey = (String, String);

/// Thread-safe in-memory candle store
///
/// Keeps a rolling window of candles per (symbol, timeframe), ordered by open_time.
/// Used for offline backtests and tests.
#[derive(Clone)]
pub struct MemoryCandleStore {
    data: Arc<RwLock<HashMap<SeriesKey, BTreeMap<i64, Candle>>>>,
    max_candles: usize,
}

impl MemoryCandleStore {
    /// Create a new store
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per series (oldest dropped first)
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    /// Get count of candles for a series
    pub fn candle_count(&self, symbol: &str, timeframe: &str) -> Result<usize> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data
            .get(&key(symbol, timeframe))
            .map(|series| series.len())
            .unwrap_or(0))
    }

    /// Clear all data
    pub fn clear_all(&self) -> Result<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        data.clear();
        Ok(())
    }
}

impl Default for MemoryCandleStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

fn key(symbol: &str, timeframe: &str) -> SeriesKey {
    (symbol.to_string(), timeframe.to_string())
}

fn lock_error<E: std::fmt::Display>(e: E) -> BotError {
    BotError::DataSource(format!("memory store lock poisoned: {}", e))
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn get_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let data = self.data.read().map_err(lock_error)?;

        let Some(series) = data.get(&key(symbol, timeframe)) else {
            return Ok(Vec::new());
        };

        let lo = start.unwrap_or(i64::MIN);
        let hi = end.unwrap_or(i64::MAX);
        if lo > hi {
            return Ok(Vec::new());
        }

        let matching = series.range(lo..=hi).map(|(_, c)| c);
        let candles: Vec<Candle> = match limit {
            Some(n) => {
                let mut recent: Vec<Candle> = matching.rev().take(n).cloned().collect();
                recent.reverse();
                recent
            }
            None => matching.cloned().collect(),
        };

        Ok(candles)
    }

    async fn upsert_many(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64> {
        let mut data = self.data.write().map_err(lock_error)?;
        let series = data.entry(key(symbol, timeframe)).or_default();

        let mut written = 0;
        for candle in candles {
            let unchanged = series
                .get(&candle.open_time)
                .is_some_and(|existing| existing.same_values(candle));
            if unchanged {
                continue;
            }
            series.insert(candle.open_time, candle.clone());
            written += 1;
        }

        // Remove oldest if exceeds max
        while series.len() > self.max_candles {
            series.pop_first();
        }

        Ok(written)
    }

    async fn get_latest_open_time(&self, symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data
            .get(&key(symbol, timeframe))
            .and_then(|series| series.keys().next_back().copied()))
    }
}
