use std::collections::BTreeMap;

use crate::models::Candle;

/// Merge stored and freshly fetched candles into one ascending series
///
/// Stored candles go in first. A fetched candle fills any open_time the store
/// lacks, but only replaces a stored one when its open_time is after
/// `threshold` (the newest reconciled store time), or when no threshold is set.
pub fn merge_candles(stored: Vec<Candle>, fetched: Vec<Candle>, threshold: Option<i64>) -> Vec<Candle> {
    let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();

    for candle in stored {
        by_time.insert(candle.open_time, candle);
    }

    for candle in fetched {
        let overwrite = threshold.map_or(true, |t| candle.open_time > t);
        if overwrite {
            by_time.insert(candle.open_time, candle);
        } else {
            by_time.entry(candle.open_time).or_insert(candle);
        }
    }

    by_time.into_values().collect()
}

/// Sort ascending and drop duplicate open_times (last one wins)
pub fn normalize(candles: Vec<Candle>) -> Vec<Candle> {
    merge_candles(candles, Vec::new(), None)
}

/// The most recent `limit` candles of an ascending series
pub fn most_recent(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}
