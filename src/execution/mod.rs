// Order execution: ledger engine plus pluggable order backends
pub mod backend;
pub mod engine;
pub mod live;

pub use backend::{OrderBackend, SimulatedBackend};
pub use engine::{ExecutionEngine, PerformanceSummary};
pub use live::LiveBackend;
