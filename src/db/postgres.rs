use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use crate::error::BotError;
use crate::models::Candle;
use crate::persistence::CandleStore;
use crate::Result;

/// Postgres candle store
pub struct PostgresCandleStore {
    pool: PgPool,
}

impl PostgresCandleStore {
    /// Connect to Postgres and run migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| BotError::DataSource(format!("{} is not representable: {}", field, value)))
}

fn to_f64(row: &PgRow, column: &str) -> Result<f64> {
    let value: Decimal = row.try_get(column)?;
    value
        .to_f64()
        .ok_or_else(|| BotError::DataSource(format!("{} out of f64 range", column)))
}

fn candle_from_row(row: &PgRow) -> Result<Candle> {
    Ok(Candle {
        symbol: row.try_get("symbol")?,
        timeframe: row.try_get("timeframe")?,
        open_time: row.try_get("open_time")?,
        close_time: row.try_get("close_time")?,
        open: to_f64(row, "open")?,
        high: to_f64(row, "high")?,
        low: to_f64(row, "low")?,
        close: to_f64(row, "close")?,
        volume: to_f64(row, "volume")?,
        quote_volume: to_f64(row, "quote_volume")?,
        taker_buy_volume: to_f64(row, "taker_buy_volume")?,
        taker_buy_quote_volume: to_f64(row, "taker_buy_quote_volume")?,
    })
}

#[async_trait]
impl CandleStore for PostgresCandleStore {
    async fn get_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        // Newest first so LIMIT keeps the most recent rows; NULL limit means ALL
        let rows = sqlx::query(
            r#"
            SELECT symbol, timeframe, open_time, close_time, open, high, low, close,
                   volume, quote_volume, taker_buy_volume, taker_buy_quote_volume
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
              AND ($3::BIGINT IS NULL OR open_time >= $3)
              AND ($4::BIGINT IS NULL OR open_time <= $4)
            ORDER BY open_time DESC
            LIMIT $5
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(start)
        .bind(end)
        .bind(limit.map(|n| n as i64))
        .fetch_all(&self.pool)
        .await?;

        let mut candles = rows.iter().map(candle_from_row).collect::<Result<Vec<_>>>()?;
        candles.reverse();

        tracing::debug!(
            "Loaded {} candles for {} {} from Postgres",
            candles.len(),
            symbol,
            timeframe
        );

        Ok(candles)
    }

    async fn upsert_many(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for candle in candles {
            let result = sqlx::query(
                r#"
                INSERT INTO candles (
                    symbol, timeframe, open_time, close_time, open, high, low, close,
                    volume, quote_volume, taker_buy_volume, taker_buy_quote_volume
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (symbol, timeframe, open_time) DO UPDATE SET
                    close_time = EXCLUDED.close_time,
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    quote_volume = EXCLUDED.quote_volume,
                    taker_buy_volume = EXCLUDED.taker_buy_volume,
                    taker_buy_quote_volume = EXCLUDED.taker_buy_quote_volume,
                    updated_at = NOW()
                WHERE (candles.close_time, candles.open, candles.high, candles.low,
                       candles.close, candles.volume, candles.quote_volume,
                       candles.taker_buy_volume, candles.taker_buy_quote_volume)
                    IS DISTINCT FROM
                      (EXCLUDED.close_time, EXCLUDED.open, EXCLUDED.high, EXCLUDED.low,
                       EXCLUDED.close, EXCLUDED.volume, EXCLUDED.quote_volume,
                       EXCLUDED.taker_buy_volume, EXCLUDED.taker_buy_quote_volume)
                "#,
            )
            .bind(symbol)
            .bind(timeframe)
            .bind(candle.open_time)
            .bind(candle.close_time)
            .bind(to_decimal(candle.open, "open")?)
            .bind(to_decimal(candle.high, "high")?)
            .bind(to_decimal(candle.low, "low")?)
            .bind(to_decimal(candle.close, "close")?)
            .bind(to_decimal(candle.volume, "volume")?)
            .bind(to_decimal(candle.quote_volume, "quote_volume")?)
            .bind(to_decimal(candle.taker_buy_volume, "taker_buy_volume")?)
            .bind(to_decimal(candle.taker_buy_quote_volume, "taker_buy_quote_volume")?)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            "Upserted {} of {} candles for {} {} to Postgres",
            written,
            candles.len(),
            symbol,
            timeframe
        );

        Ok(written)
    }

    async fn get_latest_open_time(&self, symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(open_time) FROM candles WHERE symbol = $1 AND timeframe = $2",
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_db() -> PostgresCandleStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/bandbot_test".to_string());
        let store = PostgresCandleStore::new(&database_url).await.unwrap();
        sqlx::query("DELETE FROM candles WHERE symbol LIKE 'TEST%'")
            .execute(&store.pool)
            .await
            .unwrap();
        store
    }

    fn create_test_candle(open_time: i64, price: f64) -> Candle {
        Candle {
            symbol: "TESTUSDT".to_string(),
            timeframe: "1m".to_string(),
            open_time,
            close_time: open_time + 59_999,
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 12.5,
            quote_volume: price * 12.5,
            taker_buy_volume: 6.25,
            taker_buy_quote_volume: price * 6.25,
        }
    }

    #[test]
    fn test_decimal_conversion() {
        assert_eq!(to_decimal(1.5, "open").unwrap().to_string(), "1.5");
        assert!(to_decimal(f64::NAN, "open").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_upsert_and_load_range() {
        let db = get_test_db().await;
        let candles: Vec<Candle> = (0..4)
            .map(|i| create_test_candle(i * 60_000, 100.0 + i as f64))
            .collect();

        assert_eq!(db.upsert_many("TESTUSDT", "1m", &candles).await.unwrap(), 4);
        // Same values again: nothing rewritten
        assert_eq!(db.upsert_many("TESTUSDT", "1m", &candles).await.unwrap(), 0);

        let loaded = db
            .get_range("TESTUSDT", "1m", Some(60_000), Some(120_000), None)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], candles[1]);
        assert_eq!(loaded[1], candles[2]);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_upsert_updates_changed_values() {
        let db = get_test_db().await;
        let mut candle = create_test_candle(0, 100.0);
        db.upsert_many("TESTUSDT", "1m", &[candle.clone()]).await.unwrap();

        candle.close = 101.0;
        assert_eq!(db.upsert_many("TESTUSDT", "1m", &[candle]).await.unwrap(), 1);

        let loaded = db.get_range("TESTUSDT", "1m", None, None, None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, 101.0);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_limit_and_latest_open_time() {
        let db = get_test_db().await;
        assert_eq!(db.get_latest_open_time("TESTUSDT", "1m").await.unwrap(), None);

        let candles: Vec<Candle> = (0..6)
            .map(|i| create_test_candle(i * 60_000, 100.0 + i as f64))
            .collect();
        db.upsert_many("TESTUSDT", "1m", &candles).await.unwrap();

        let recent = db.get_range("TESTUSDT", "1m", None, None, Some(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].open_time, 240_000);
        assert_eq!(recent[1].open_time, 300_000);

        assert_eq!(
            db.get_latest_open_time("TESTUSDT", "1m").await.unwrap(),
            Some(300_000)
        );
    }
}
