// Technical indicators module
// Moving-average envelope (Bollinger bands) for the signal engine

pub mod bollinger;
pub mod moving_average;

pub use bollinger::{calculate_bands, BandResult};
pub use moving_average::calculate_sma;
