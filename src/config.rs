//! Application configuration
//!
//! Loaded once at startup and handed to each component's constructor.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::api::binance::MAX_KLINES_PER_REQUEST;
use crate::error::BotError;
use crate::models::Timeframe;
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Exchange REST endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub requests_per_minute: u32,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            api_key: None,
            api_secret: None,
            requests_per_minute: 1200,
            recv_window_ms: 5000,
        }
    }
}

/// Candle store selection; with neither URL set an in-memory store is used
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub postgres_url: Option<String>,
    pub redis_url: Option<String>,
    pub memory_max_candles: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            redis_url: None,
            memory_max_candles: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub timeframe: String,
    /// Band window length
    pub period: usize,
    /// Standard deviations between middle and outer bands
    pub multiplier: f64,
    /// Bars after a trade during which entries are suppressed
    pub cooldown_bars: u64,
    /// Fraction, e.g. 0.05 = exit at -5%
    pub stop_loss_percent: f64,
    /// Fraction; only used when no exit policy is configured
    pub take_profit_percent: f64,
    /// Fraction of cash committed per entry
    pub position_size_percent: f64,
    pub trailing_exit: Option<TrailingExitConfig>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            timeframe: "1h".to_string(),
            period: 20,
            multiplier: 2.0,
            cooldown_bars: 5,
            stop_loss_percent: 0.05,
            take_profit_percent: 0.10,
            position_size_percent: 0.95,
            trailing_exit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrailingExitConfig {
    /// Gain (fraction) needed before the trailing stop arms
    pub activation_percent: f64,
    /// Allowed pullback (fraction) from the highest price since entry
    pub trail_percent: f64,
}

impl Default for TrailingExitConfig {
    fn default() -> Self {
        Self {
            activation_percent: 0.03,
            trail_percent: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Simulated,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    pub initial_capital: f64,
    /// Fraction of notional charged per fill
    pub commission_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulated,
            initial_capital: 10_000.0,
            commission_rate: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Max candles requested from the remote feed per call
    pub fetch_batch_limit: usize,
    /// Deadline for a whole synchronization call
    pub timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_batch_limit: 1000,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "bandbot=info,bandbot::strategy=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`BANDBOT__SECTION__KEY`)
    /// 2. Configuration file (TOML)
    /// 3. Default values
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            } else {
                tracing::warn!("Config file {} not found, using defaults", path);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BANDBOT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| BotError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BotError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if s.period == 0 {
            return Err(BotError::Config("strategy.period must be positive".to_string()));
        }
        if s.multiplier <= 0.0 {
            return Err(BotError::Config("strategy.multiplier must be positive".to_string()));
        }
        if Timeframe::parse(&s.timeframe).is_none() {
            return Err(BotError::Config(format!(
                "strategy.timeframe '{}' is not a known timeframe",
                s.timeframe
            )));
        }
        if s.stop_loss_percent < 0.0 || s.take_profit_percent < 0.0 {
            return Err(BotError::Config(
                "stop_loss_percent and take_profit_percent must not be negative".to_string(),
            ));
        }
        if !(s.position_size_percent > 0.0 && s.position_size_percent <= 1.0) {
            return Err(BotError::Config(
                "strategy.position_size_percent must be in (0, 1]".to_string(),
            ));
        }

        let e = &self.execution;
        if e.initial_capital < 0.0 || e.commission_rate < 0.0 {
            return Err(BotError::Config(
                "initial_capital and commission_rate must not be negative".to_string(),
            ));
        }
        if e.mode == ExecutionMode::Live
            && (self.exchange.api_key.is_none() || self.exchange.api_secret.is_none())
        {
            return Err(BotError::Config(
                "live execution needs exchange.api_key and exchange.api_secret".to_string(),
            ));
        }

        if self.sync.fetch_batch_limit == 0 || self.sync.fetch_batch_limit > MAX_KLINES_PER_REQUEST {
            return Err(BotError::Config(format!(
                "sync.fetch_batch_limit must be in 1..={}",
                MAX_KLINES_PER_REQUEST
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.period, 20);
        assert_eq!(config.execution.mode, ExecutionMode::Simulated);
        assert_eq!(config.sync.fetch_batch_limit, 1000);
    }

    #[test]
    fn test_rejects_bad_strategy_values() {
        let mut config = AppConfig::default();
        config.strategy.period = 0;
        assert!(matches!(config.validate(), Err(BotError::Config(_))));

        let mut config = AppConfig::default();
        config.strategy.timeframe = "7m".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("7m"));

        let mut config = AppConfig::default();
        config.strategy.position_size_percent = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_limit_within_exchange_cap() {
        let mut config = AppConfig::default();
        config.sync.fetch_batch_limit = 1500;
        assert!(config.validate().unwrap_err().to_string().contains("fetch_batch_limit"));

        config.sync.fetch_batch_limit = 0;
        assert!(config.validate().is_err());

        config.sync.fetch_batch_limit = MAX_KLINES_PER_REQUEST;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_live_mode_needs_credentials() {
        let mut config = AppConfig::default();
        config.execution.mode = ExecutionMode::Live;
        assert!(config.validate().is_err());

        config.exchange.api_key = Some("key".to_string());
        config.exchange.api_secret = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                r#"
                [strategy]
                symbol = "ETHUSDT"
                period = 10

                [strategy.trailing_exit]
                activation_percent = 0.05
                trail_percent = 0.01

                [execution]
                mode = "live"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.strategy.symbol, "ETHUSDT");
        assert_eq!(config.strategy.period, 10);
        assert_eq!(config.strategy.multiplier, 2.0);
        assert_eq!(
            config.strategy.trailing_exit,
            Some(TrailingExitConfig {
                activation_percent: 0.05,
                trail_percent: 0.01
            })
        );
        assert_eq!(config.execution.mode, ExecutionMode::Live);
        assert_eq!(config.exchange.base_url, "https://api.binance.com");
    }
}
