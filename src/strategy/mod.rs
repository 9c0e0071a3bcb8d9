// Band-breakout signal engine and exit policies
pub mod exit_policy;
pub mod signal_engine;

pub use exit_policy::{ExitDecision, ExitPolicy, TradeInfo, TrailingStopExit};
pub use signal_engine::{Phase, SignalAction, SignalEngine, StrategyState, TradeSignal};
