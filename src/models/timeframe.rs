use serde::{Deserialize, Serialize};
use std::fmt;

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Candle timeframe with a fixed millisecond interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    S1,
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    /// Calendar month, approximated as 30 days
    Mo1,
}

impl Timeframe {
    /// Parse an exchange timeframe string ("1m", "4h", "1M", ...)
    ///
    /// Returns None for unrecognized strings; callers then skip gap detection.
    pub fn parse(s: &str) -> Option<Self> {
        let tf = match s {
            "1s" => Timeframe::S1,
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "8h" => Timeframe::H8,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            "3d" => Timeframe::D3,
            "1w" => Timeframe::W1,
            "1M" => Timeframe::Mo1,
            _ => return None,
        };
        Some(tf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    pub fn interval_ms(&self) -> i64 {
        match self {
            Timeframe::S1 => SECOND,
            Timeframe::M1 => MINUTE,
            Timeframe::M3 => 3 * MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::M30 => 30 * MINUTE,
            Timeframe::H1 => HOUR,
            Timeframe::H2 => 2 * HOUR,
            Timeframe::H4 => 4 * HOUR,
            Timeframe::H6 => 6 * HOUR,
            Timeframe::H8 => 8 * HOUR,
            Timeframe::H12 => 12 * HOUR,
            Timeframe::D1 => DAY,
            Timeframe::D3 => 3 * DAY,
            Timeframe::W1 => 7 * DAY,
            Timeframe::Mo1 => 30 * DAY,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interval for a raw timeframe string, None if unrecognized
pub fn interval_ms(timeframe: &str) -> Option<i64> {
    Timeframe::parse(timeframe).map(|tf| tf.interval_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_intervals() {
        assert_eq!(interval_ms("1s"), Some(1_000));
        assert_eq!(interval_ms("1m"), Some(60_000));
        assert_eq!(interval_ms("15m"), Some(900_000));
        assert_eq!(interval_ms("4h"), Some(14_400_000));
        assert_eq!(interval_ms("1d"), Some(86_400_000));
        assert_eq!(interval_ms("1w"), Some(604_800_000));
        assert_eq!(interval_ms("1M"), Some(2_592_000_000));
    }

    #[test]
    fn test_unknown_timeframe() {
        assert_eq!(interval_ms("7m"), None);
        assert_eq!(interval_ms(""), None);
        // Case matters: "1M" is a month, "1m" a minute
        assert_ne!(interval_ms("1M"), interval_ms("1m"));
    }

    #[test]
    fn test_round_trip_names() {
        for name in ["1s", "3m", "2h", "12h", "3d", "1M"] {
            assert_eq!(Timeframe::parse(name).unwrap().as_str(), name);
        }
    }
}
