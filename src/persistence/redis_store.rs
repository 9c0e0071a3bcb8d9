use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::CandleStore;
use crate::error::BotError;
use crate::models::Candle;
use crate::Result;

/// Redis candle cache
///
/// Uses sorted sets with open_time as score: `candles:{symbol}:{timeframe}`.
/// Each member is the JSON-encoded candle.
#[derive(Clone)]
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

impl RedisCandleStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                BotError::DataSource("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(symbol: &str, timeframe: &str) -> String {
        format!("candles:{}:{}", symbol, timeframe)
    }

    fn decode(members: Vec<String>) -> Result<Vec<Candle>> {
        members
            .iter()
            .map(|json| serde_json::from_str(json).map_err(BotError::from))
            .collect()
    }
}

fn bound(value: Option<i64>, open: &str) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| open.to_string())
}

#[async_trait]
impl CandleStore for RedisCandleStore {
    async fn get_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let key = Self::key(symbol, timeframe);
        let min = bound(start, "-inf");
        let max = bound(end, "+inf");
        let mut conn = self.conn.clone();

        match limit {
            Some(n) => {
                let members: Vec<String> = conn
                    .zrevrangebyscore_limit(&key, max, min, 0, n as isize)
                    .await?;
                let mut candles = Self::decode(members)?;
                candles.reverse();
                Ok(candles)
            }
            None => {
                let members: Vec<String> = conn.zrangebyscore(&key, min, max).await?;
                Self::decode(members)
            }
        }
    }

    async fn upsert_many(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64> {
        let key = Self::key(symbol, timeframe);
        let mut conn = self.conn.clone();
        let mut written = 0;

        for candle in candles {
            let existing: Vec<String> = conn
                .zrangebyscore(&key, candle.open_time, candle.open_time)
                .await?;
            let unchanged = Self::decode(existing)?
                .first()
                .is_some_and(|stored| stored.same_values(candle));
            if unchanged {
                continue;
            }

            let value = serde_json::to_string(candle)?;
            let _: () = redis::pipe()
                .atomic()
                .zrembyscore(&key, candle.open_time, candle.open_time)
                .ignore()
                .zadd(&key, value, candle.open_time)
                .ignore()
                .query_async(&mut conn)
                .await?;
            written += 1;
        }

        tracing::debug!(
            "Upserted {} of {} candles for {} {} in Redis",
            written,
            candles.len(),
            symbol,
            timeframe
        );

        Ok(written)
    }

    async fn get_latest_open_time(&self, symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        let key = Self::key(symbol, timeframe);
        let mut conn = self.conn.clone();
        let newest: Vec<(String, f64)> = conn.zrevrange_withscores(&key, 0, 0).await?;
        Ok(newest.first().map(|(_, score)| *score as i64))
    }
}
