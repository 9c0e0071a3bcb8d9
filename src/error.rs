use thiserror::Error;

use crate::models::OrderResult;

/// Result type alias using BotError
pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    /// Candle store or remote feed I/O failure
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Buy rejected locally; `result` is the auditable failed order
    #[error("Insufficient cash: need {required:.4}, have {available:.4}")]
    InsufficientCash {
        required: f64,
        available: f64,
        result: Box<OrderResult>,
    },

    /// Sell rejected locally; `result` is the auditable failed order
    #[error("Insufficient position: need {required:.8}, have {available:.8}")]
    InsufficientPosition {
        required: f64,
        available: f64,
        result: Box<OrderResult>,
    },

    #[error("Insufficient data: need {needed} prices, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Band width undefined: middle band is zero")]
    UndefinedBandWidth,

    /// Order backend failure, passed through untouched
    #[error("Order backend error: {0}")]
    Backend(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// Local cash/position rejection (never reached the backend)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BotError::InsufficientCash { .. } | BotError::InsufficientPosition { .. }
        )
    }

    pub fn is_data_source(&self) -> bool {
        matches!(self, BotError::DataSource(_))
    }

    /// Failed order attached to a validation error
    pub fn rejected_order(&self) -> Option<&OrderResult> {
        match self {
            BotError::InsufficientCash { result, .. }
            | BotError::InsufficientPosition { result, .. } => Some(result),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for BotError {
    fn from(e: sqlx::Error) -> Self {
        BotError::DataSource(format!("postgres: {}", e))
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        BotError::DataSource(format!("postgres migration: {}", e))
    }
}

impl From<redis::RedisError> for BotError {
    fn from(e: redis::RedisError) -> Self {
        BotError::DataSource(format!("redis: {}", e))
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::DataSource(format!("http: {}", e))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::DataSource(format!("json: {}", e))
    }
}
