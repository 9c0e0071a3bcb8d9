use crate::models::{Candle, TimeRange};

/// Open-time ranges inside `[start, end]` not covered by `candles`
///
/// `candles` must be ascending and deduplicated by open_time. Ranges are
/// inclusive and aligned to the candle grid of `interval` milliseconds.
pub fn find_missing_ranges(candles: &[Candle], start: i64, end: i64, interval: i64) -> Vec<TimeRange> {
    if start > end || interval <= 0 {
        return Vec::new();
    }

    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return vec![TimeRange::new(start, end)];
    };

    let mut gaps = Vec::new();

    // Before the first stored candle
    if first.open_time > start {
        let gap_end = first.open_time - interval;
        if gap_end >= start {
            gaps.push(TimeRange::new(start, gap_end));
        }
    }

    // Between consecutive candles
    for pair in candles.windows(2) {
        let (prev, next) = (pair[0].open_time, pair[1].open_time);
        if next > prev + interval {
            gaps.push(TimeRange::new(prev + interval, next - interval));
        }
    }

    // After the last stored candle
    if last.open_time < end {
        let gap_start = last.open_time + interval;
        if gap_start <= end {
            gaps.push(TimeRange::new(gap_start, end));
        }
    }

    gaps
}
