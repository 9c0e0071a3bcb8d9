// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod strategy;
pub mod sync;
pub mod trader;

// Re-export commonly used types
pub use api::{OrderRequest, RemoteFeed};
pub use config::AppConfig;
pub use models::*;
pub use persistence::CandleStore;

// Error handling
pub use error::{BotError, Result};
