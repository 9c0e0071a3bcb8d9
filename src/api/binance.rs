use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::{OrderRequest, RemoteFeed};
use crate::config::ExchangeConfig;
use crate::error::BotError;
use crate::models::{AccountBalance, Candle, OrderResult, OrderType};
use crate::Result;

/// Exchange cap on klines per request
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

type HmacSha256 = Hmac<Sha256>;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Binance spot REST API (and compatible testnets)
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    transact_time: i64,
    executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty")]
    cumulative_quote_qty: String,
    status: String,
    #[serde(default)]
    fills: Vec<FillRaw>,
}

#[derive(Debug, Deserialize)]
struct FillRaw {
    commission: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceRaw>,
}

#[derive(Debug, Deserialize)]
struct BalanceRaw {
    asset: String,
    free: String,
    locked: String,
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BotError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| BotError::Config("requests_per_minute must be positive".to_string()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            rate_limiter,
        })
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(&self, query: &str) -> Result<String> {
        let secret = self
            .api_secret
            .as_deref()
            .ok_or_else(|| BotError::Config("exchange.api_secret is not set".to_string()))?;
        sign_query(secret, query)
    }

    /// Make a rate-limited request, mapping non-2xx responses through `on_error`
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        on_error: fn(String) -> BotError,
    ) -> Result<reqwest::Response> {
        let mut query = encode_params(params);
        let mut request_key = None;

        if signed {
            let timestamp = chrono::Utc::now().timestamp_millis();
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms, timestamp
            ));
            let signature = self.sign(&query)?;
            query.push_str(&format!("&signature={}", signature));

            request_key = Some(
                self.api_key
                    .clone()
                    .ok_or_else(|| BotError::Config("exchange.api_key is not set".to_string()))?,
            );
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.rate_limiter.until_ready().await;

        let mut builder = self.client.request(method, &url);
        if let Some(key) = request_key {
            builder = builder.header("X-MBX-APIKEY", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| on_error(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(on_error(format!("Binance API error ({}): {}", status, body)));
        }

        Ok(response)
    }
}

fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Config(format!("Failed to create HMAC: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Fixed-point decimal without trailing zeros, as the exchange expects
fn format_decimal(value: f64) -> String {
    let s = format!("{:.8}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

fn parse_num(value: &str, field: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| BotError::DataSource(format!("invalid {} '{}': {}", field, value, e)))
}

fn field_num(row: &[Value], idx: usize, field: &str) -> Result<f64> {
    match row.get(idx) {
        Some(Value::String(s)) => parse_num(s, field),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| BotError::DataSource(format!("invalid {}", field))),
        _ => Err(BotError::DataSource(format!("kline missing {}", field))),
    }
}

fn field_time(row: &[Value], idx: usize, field: &str) -> Result<i64> {
    row.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| BotError::DataSource(format!("kline missing {}", field)))
}

/// Kline array: [openTime, open, high, low, close, volume, closeTime,
/// quoteVolume, trades, takerBuyBase, takerBuyQuote, ignore]
fn parse_kline(symbol: &str, timeframe: &str, row: &[Value]) -> Result<Candle> {
    Ok(Candle {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time: field_time(row, 0, "open_time")?,
        open: field_num(row, 1, "open")?,
        high: field_num(row, 2, "high")?,
        low: field_num(row, 3, "low")?,
        close: field_num(row, 4, "close")?,
        volume: field_num(row, 5, "volume")?,
        close_time: field_time(row, 6, "close_time")?,
        quote_volume: field_num(row, 7, "quote_volume")?,
        taker_buy_volume: field_num(row, 9, "taker_buy_volume")?,
        taker_buy_quote_volume: field_num(row, 10, "taker_buy_quote_volume")?,
    })
}

impl OrderResponse {
    fn into_result(self, request: &OrderRequest) -> Result<OrderResult> {
        let executed = parse_num(&self.executed_qty, "executedQty")?;
        let quote = parse_num(&self.cumulative_quote_qty, "cummulativeQuoteQty")?;
        let commission = self
            .fills
            .iter()
            .map(|f| parse_num(&f.commission, "commission"))
            .sum::<Result<f64>>()?;

        let filled = executed > 0.0 && (self.status == "FILLED" || self.status == "PARTIALLY_FILLED");
        let price = if executed > 0.0 {
            quote / executed
        } else {
            request.price.unwrap_or(0.0)
        };

        Ok(OrderResult {
            order_id: self.order_id.to_string(),
            trading_pair: self.symbol,
            side: request.side,
            quantity: executed,
            price,
            commission,
            timestamp: self.transact_time,
            success: filled,
            error: (!filled).then(|| format!("order status {}", self.status)),
        })
    }
}

#[async_trait]
impl RemoteFeed for BinanceClient {
    /// Get klines
    /// Endpoint: GET /api/v3/klines?symbol=&interval=&startTime=&endTime=&limit=
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.to_string()),
        ];
        if let Some(start) = start {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end {
            params.push(("endTime", end.to_string()));
        }
        params.push(("limit", limit.to_string()));

        let rows: Vec<Vec<Value>> = self
            .send(Method::GET, "/api/v3/klines", &params, false, BotError::DataSource)
            .await?
            .json()
            .await?;

        let candles = rows
            .iter()
            .map(|row| parse_kline(symbol, timeframe, row))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Fetched {} {} {} klines from Binance",
            candles.len(),
            symbol,
            timeframe
        );

        Ok(candles)
    }

    /// Place an order
    /// Endpoint: POST /api/v3/order (signed)
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.as_str().to_string()),
            ("type", request.order_type.as_str().to_string()),
            ("quantity", format_decimal(request.quantity)),
            ("newOrderRespType", "FULL".to_string()),
        ];
        if request.order_type == OrderType::Limit {
            let price = request.price.ok_or_else(|| {
                BotError::Backend("limit order requires a price".to_string())
            })?;
            params.push(("price", format_decimal(price)));
            params.push(("timeInForce", "GTC".to_string()));
        }

        let response: OrderResponse = self
            .send(Method::POST, "/api/v3/order", &params, true, BotError::Backend)
            .await?
            .json()
            .await
            .map_err(|e| BotError::Backend(format!("invalid order response: {}", e)))?;

        let result = response.into_result(request)?;

        tracing::info!(
            "Binance {} {} {} -> order {} status ok={} @ {:.4}",
            request.side.as_str(),
            format_decimal(request.quantity),
            request.symbol,
            result.order_id,
            result.success,
            result.price
        );

        Ok(result)
    }

    /// Account balances
    /// Endpoint: GET /api/v3/account (signed)
    async fn get_balances(&self) -> Result<Vec<AccountBalance>> {
        let account: AccountResponse = self
            .send(Method::GET, "/api/v3/account", &[], true, BotError::DataSource)
            .await?
            .json()
            .await?;

        account
            .balances
            .into_iter()
            .map(|b| {
                Ok(AccountBalance {
                    free: parse_num(&b.free, "free")?,
                    locked: parse_num(&b.locked, "locked")?,
                    asset: b.asset,
                })
            })
            .collect()
    }
}
