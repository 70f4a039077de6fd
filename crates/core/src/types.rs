//! Core data types for the candle pipeline.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trade and window timestamps (UTC, second precision in practice).
pub type Timestamp = DateTime<Utc>;

/// Price type with ordering support.
pub type Price = ordered_float::OrderedFloat<f64>;

/// Trade quantity.
pub type Quantity = i64;

/// A single trade execution read from the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Instrument identifier (ticker).
    pub instrument: String,
    /// Trade price.
    pub price: f64,
    /// Trade quantity.
    pub quantity: Quantity,
    /// Execution time.
    pub timestamp: Timestamp,
}

/// Width of an aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Resolution {
    minutes: u32,
}

impl Resolution {
    /// Create a resolution of the given number of minutes.
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(Error::config("resolution must be at least one minute"));
        }
        Ok(Self { minutes })
    }

    /// Window width in minutes.
    #[inline]
    pub fn minutes(self) -> u32 {
        self.minutes
    }

    /// Window width as a time delta.
    #[inline]
    pub fn step(self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.minutes))
    }

    /// Short label, e.g. `5m`.
    pub fn label(self) -> String {
        format!("{}m", self.minutes)
    }

    /// Output file name for this resolution, e.g. `candles_5m.csv`.
    pub fn file_name(self, prefix: &str) -> String {
        format!("{}_{}.csv", prefix, self.label())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes)
    }
}

impl TryFrom<u32> for Resolution {
    type Error = Error;

    fn try_from(minutes: u32) -> Result<Self> {
        Self::from_minutes(minutes)
    }
}

impl From<Resolution> for u32 {
    fn from(resolution: Resolution) -> u32 {
        resolution.minutes
    }
}

/// Open/high/low/close summary of one instrument over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument identifier.
    pub instrument: String,
    /// Start of the window this candle covers.
    pub window_start: Timestamp,
    /// Price of the first trade in the window.
    pub open: f64,
    /// Highest trade price.
    pub high: f64,
    /// Lowest trade price.
    pub low: f64,
    /// Price of the last trade in the window.
    pub close: f64,
    /// Number of trades folded into the candle.
    pub trade_count: u64,
    /// Total traded quantity.
    pub volume: Quantity,
}

/// Candles emitted together for one resolution at one window boundary.
///
/// Candles are held in ascending order of their low price. Equal lows keep the
/// order they were supplied in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleBatch {
    /// Resolution that produced the batch.
    pub resolution: Resolution,
    /// Window start shared by every candle in the batch.
    pub window_start: Timestamp,
    candles: Vec<Candle>,
}

impl CandleBatch {
    /// Build a batch, ordering the candles by low price.
    pub fn new(resolution: Resolution, window_start: Timestamp, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| Price::from(c.low));
        Self {
            resolution,
            window_start,
            candles,
        }
    }

    /// An empty batch.
    pub fn empty(resolution: Resolution, window_start: Timestamp) -> Self {
        Self {
            resolution,
            window_start,
            candles: Vec::new(),
        }
    }

    /// Candles in emission order.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Number of candles.
    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// True when no instrument traded in the window.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Iterate candles in emission order.
    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }
}

impl IntoIterator for CandleBatch {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(instrument: &str, low: f64) -> Candle {
        Candle {
            instrument: instrument.to_string(),
            window_start: Utc.with_ymd_and_hms(2019, 1, 30, 7, 0, 0).unwrap(),
            open: low + 1.0,
            high: low + 2.0,
            low,
            close: low + 1.5,
            trade_count: 1,
            volume: 10,
        }
    }

    #[test]
    fn test_resolution_labels() {
        let res = Resolution::from_minutes(240).unwrap();
        assert_eq!(res.label(), "240m");
        assert_eq!(res.to_string(), "240m");
        assert_eq!(res.file_name("candles"), "candles_240m.csv");
        assert_eq!(res.step(), TimeDelta::hours(4));
    }

    #[test]
    fn test_zero_resolution_rejected() {
        assert!(Resolution::from_minutes(0).is_err());
        assert!(serde_json::from_str::<Resolution>("0").is_err());
        assert_eq!(serde_json::from_str::<Resolution>("30").unwrap().minutes(), 30);
    }

    #[test]
    fn test_batch_orders_by_low() {
        let res = Resolution::from_minutes(5).unwrap();
        let start = Utc.with_ymd_and_hms(2019, 1, 30, 7, 0, 0).unwrap();
        let batch = CandleBatch::new(
            res,
            start,
            vec![candle("A", 10.0), candle("B", 5.0), candle("C", 20.0)],
        );

        let order: Vec<&str> = batch.iter().map(|c| c.instrument.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_batch_equal_lows_keep_input_order() {
        let res = Resolution::from_minutes(5).unwrap();
        let start = Utc.with_ymd_and_hms(2019, 1, 30, 7, 0, 0).unwrap();
        let batch = CandleBatch::new(res, start, vec![candle("AAPL", 7.0), candle("AMZN", 7.0)]);

        assert_eq!(batch.candles()[0].instrument, "AAPL");
        assert_eq!(batch.candles()[1].instrument, "AMZN");
    }

    #[test]
    fn test_empty_batch() {
        let res = Resolution::from_minutes(30).unwrap();
        let batch = CandleBatch::empty(res, Timestamp::default());
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
