//! Bollinger bands: SMA middle line with upper/lower lines at
//! `multiplier` population standard deviations.

use serde::{Deserialize, Serialize};

use super::moving_average::calculate_sma;
use crate::error::{BotError, Result};

/// Band values for one bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandResult {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    /// Most recent close in the window
    pub price: f64,
    pub timestamp: i64,
}

impl BandResult {
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_upper_breakout(&self) -> bool {
        self.price >= self.upper
    }

    pub fn is_lower_breakout(&self) -> bool {
        self.price <= self.lower
    }

    /// (upper - lower) / middle; errors when the middle band is zero
    pub fn band_width(&self) -> Result<f64> {
        if self.middle == 0.0 {
            return Err(BotError::UndefinedBandWidth);
        }
        Ok((self.upper - self.lower) / self.middle)
    }

    /// Position of price inside the bands: 0 at lower, 1 at upper.
    /// Collapsed bands (upper == lower) report 0.
    pub fn percent_b(&self) -> f64 {
        let width = self.upper - self.lower;
        if width == 0.0 {
            return 0.0;
        }
        (self.price - self.lower) / width
    }
}

/// Compute bands over the trailing `period` prices
///
/// # Arguments
/// * `prices` - Closes, oldest first
/// * `period` - Window length (must be > 0)
/// * `multiplier` - Standard deviations between middle and outer bands
pub fn calculate_bands(prices: &[f64], period: usize, multiplier: f64) -> Result<BandResult> {
    let middle = calculate_sma(prices, period).ok_or(BotError::InsufficientData {
        needed: period.max(1),
        got: prices.len(),
    })?;

    let window = &prices[prices.len() - period..];
    let variance = window
        .iter()
        .map(|p| {
            let diff = p - middle;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    let deviation = variance.sqrt();

    Ok(BandResult {
        middle,
        upper: middle + multiplier * deviation,
        lower: middle - multiplier * deviation,
        price: window[window.len() - 1],
        timestamp: 0,
    })
}
