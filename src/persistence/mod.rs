// Candle storage: trait plus in-memory and Redis implementations
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::models::Candle;
use crate::Result;

pub use memory::MemoryCandleStore;
pub use redis_store::RedisCandleStore;

/// Persistent candle series keyed by (symbol, timeframe, open_time)
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Candles with `start <= open_time <= end`, ascending by open_time
    ///
    /// Missing bounds are open. With `limit`, only the most recent `limit`
    /// matching candles are returned (still ascending).
    async fn get_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>>;

    /// Idempotent insert-or-update on (symbol, timeframe, open_time)
    ///
    /// Existing rows are only rewritten when a value differs.
    /// Returns the number of rows inserted or changed.
    async fn upsert_many(&self, symbol: &str, timeframe: &str, candles: &[Candle])
        -> Result<u64>;

    /// Newest stored open_time, None when the series is empty
    async fn get_latest_open_time(&self, symbol: &str, timeframe: &str) -> Result<Option<i64>>;
}
