// =============================================================================
// Market Data — validated OHLCV bars and series
// =============================================================================
//
// A `BarSeries` is only ever constructed through validation: every bar must
// carry finite numerics with `low <= open,close <= high` and non-negative
// volume, and timestamps must be strictly increasing. Downstream consumers
// (strategies, regime detection, sizing) can therefore index freely without
// re-checking.
// =============================================================================

pub mod calendar;
pub mod fallback;
pub mod provider;

pub use provider::MarketDataProvider;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar. `timestamp` is epoch seconds UTC of the bar open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Structural validity: finite fields, OHLC ordering, non-negative volume.
    pub fn is_valid(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
            && self.volume >= 0.0
    }
}

/// Composite key identifying a unique bar series request.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BarsKey {
    pub symbol: String,
    pub interval: String,
    pub lookback_days: u32,
}

impl std::fmt::Display for BarsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}d", self.symbol, self.interval, self.lookback_days)
    }
}

// ---------------------------------------------------------------------------
// BarSeries
// ---------------------------------------------------------------------------

/// An ordered, validated sequence of bars (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// An empty series (valid; strategies treat it as "insufficient data").
    pub fn empty() -> Self {
        Self { bars: Vec::new() }
    }

    /// Validate and wrap a raw bar vector.
    ///
    /// Rejects: any non-finite field, OHLC ordering violations, negative
    /// volume, and non-increasing timestamps (duplicates included).
    pub fn from_bars(symbol: &str, bars: Vec<Bar>) -> Result<Self, DataError> {
        for (i, bar) in bars.iter().enumerate() {
            if !bar.is_valid() {
                return Err(DataError::Malformed {
                    symbol: symbol.to_string(),
                    detail: format!("invalid bar at index {i}: {bar:?}"),
                });
            }
            if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                return Err(DataError::Malformed {
                    symbol: symbol.to_string(),
                    detail: format!(
                        "non-increasing timestamp at index {i}: {} <= {}",
                        bar.timestamp,
                        bars[i - 1].timestamp
                    ),
                });
            }
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Closing prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// The most recent `count` bars (oldest-first order preserved).
    pub fn tail(&self, count: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(count);
        &self.bars[start..]
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn valid_series_accepted() {
        let bars = vec![
            bar(100, 10.0, 11.0, 9.5, 10.5, 1000.0),
            bar(160, 10.5, 10.8, 10.1, 10.2, 900.0),
        ];
        let series = BarSeries::from_bars("TCS", bars).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.last_close(), Some(10.2));
    }

    #[test]
    fn rejects_nan_field() {
        let bars = vec![bar(100, f64::NAN, 11.0, 9.5, 10.5, 1000.0)];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn rejects_infinite_field() {
        let bars = vec![bar(100, 10.0, f64::INFINITY, 9.5, 10.5, 1000.0)];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn rejects_ohlc_ordering_violation() {
        // close above high
        let bars = vec![bar(100, 10.0, 11.0, 9.5, 12.0, 1000.0)];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        let bars = vec![bar(100, 10.0, 11.0, 9.5, 10.5, -1.0)];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let bars = vec![
            bar(100, 10.0, 11.0, 9.5, 10.5, 1000.0),
            bar(100, 10.5, 10.8, 10.1, 10.2, 900.0),
        ];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn rejects_out_of_order_timestamps() {
        let bars = vec![
            bar(200, 10.0, 11.0, 9.5, 10.5, 1000.0),
            bar(100, 10.5, 10.8, 10.1, 10.2, 900.0),
        ];
        assert!(BarSeries::from_bars("TCS", bars).is_err());
    }

    #[test]
    fn empty_series_is_fine() {
        let series = BarSeries::from_bars("TCS", Vec::new()).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.last_close(), None);
    }

    #[test]
    fn tail_returns_most_recent() {
        let bars: Vec<Bar> = (0..10)
            .map(|i| bar(100 + i * 60, 10.0, 11.0, 9.5, 10.5, 100.0))
            .collect();
        let series = BarSeries::from_bars("TCS", bars).unwrap();
        let tail = series.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].timestamp, 100 + 7 * 60);
        // Asking for more than we have returns everything.
        assert_eq!(series.tail(99).len(), 10);
    }
}
