// =============================================================================
// Index Regime Detector
// =============================================================================
//
// Classifies each index from daily-scale bars into a trend direction and a
// volatility bucket, with a confidence score. Consumed only by the F&O
// strategy composer for structure selection; single-name equity trades never
// consult the regime.
//
// Trend: short EMA vs long EMA, confirmed by the normalised window slope.
// Volatility: realized ATR% measured against the index's characteristic
// average daily move:
//
//   ratio < 0.7   => LOW
//   ratio < 1.3   => NORMAL
//   ratio < 2.0   => HIGH
//   otherwise     => EXTREME
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::atr::calculate_atr_pct;
use crate::indicators::ema::calculate_ema;
use crate::indicators::trend::normalized_slope;
use crate::market_data::BarSeries;

// =============================================================================
// Types
// =============================================================================

/// Direction of the prevailing index trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Realized volatility relative to the index's characteristic daily move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Snapshot of the detected regime plus the contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub trend: Trend,
    pub volatility: VolatilityBucket,
    /// Confidence in the classification [0, 1].
    pub confidence: f64,
    /// Realized ATR as a percentage of the last close.
    pub atr_pct: f64,
    /// Normalised least-squares slope of the window.
    pub slope: f64,
}

// =============================================================================
// RegimeDetector
// =============================================================================

/// EMA periods for the trend read (daily bars).
const SHORT_PERIOD: usize = 10;
const LONG_PERIOD: usize = 30;

/// Slope (fraction of price per day) below which the trend is sideways.
const SLOPE_FLOOR: f64 = 0.0005;

/// Thread-safe detector caching the latest regime per index.
pub struct RegimeDetector {
    state: RwLock<HashMap<String, RegimeState>>,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Run detection for `index` from daily bars and cache the result.
    ///
    /// `avg_daily_move_pct` comes from the index characteristics table and
    /// anchors the volatility buckets. Returns `None` when the series is too
    /// short for the long EMA.
    pub fn detect(
        &self,
        index: &str,
        daily_bars: &BarSeries,
        avg_daily_move_pct: f64,
    ) -> Option<RegimeState> {
        if daily_bars.len() < LONG_PERIOD + 5 || avg_daily_move_pct <= 0.0 {
            return None;
        }

        let closes = daily_bars.closes();
        let short = calculate_ema(&closes, SHORT_PERIOD);
        let long = calculate_ema(&closes, LONG_PERIOD);
        let (s_now, l_now) = (*short.last()?, *long.last()?);
        if l_now == 0.0 {
            return None;
        }

        let window = &closes[closes.len().saturating_sub(LONG_PERIOD)..];
        let slope = normalized_slope(window)?;
        let separation = (s_now - l_now) / l_now;

        let trend = if separation > 0.0 && slope > SLOPE_FLOOR {
            Trend::Bullish
        } else if separation < 0.0 && slope < -SLOPE_FLOOR {
            Trend::Bearish
        } else {
            Trend::Sideways
        };

        let atr_pct = calculate_atr_pct(daily_bars.bars(), 14)?;
        let ratio = atr_pct / avg_daily_move_pct;
        let volatility = if ratio < 0.7 {
            VolatilityBucket::Low
        } else if ratio < 1.3 {
            VolatilityBucket::Normal
        } else if ratio < 2.0 {
            VolatilityBucket::High
        } else {
            VolatilityBucket::Extreme
        };

        // Confidence: how decisively the EMAs and slope agree, capped by how
        // clean the volatility read is (extreme readings are noisy).
        let trend_conf = match trend {
            Trend::Sideways => 0.5,
            _ => (0.5 + separation.abs() * 40.0 + slope.abs() * 100.0).min(1.0),
        };
        let vol_conf = match volatility {
            VolatilityBucket::Extreme => 0.6,
            _ => 1.0,
        };
        let confidence = (trend_conf * vol_conf).clamp(0.0, 1.0);

        let state = RegimeState {
            trend,
            volatility,
            confidence,
            atr_pct,
            slope,
        };

        debug!(
            index,
            trend = %trend,
            volatility = %volatility,
            confidence = format!("{confidence:.2}"),
            atr_pct = format!("{atr_pct:.2}"),
            "regime detected"
        );

        self.state.write().insert(index.to_string(), state.clone());
        Some(state)
    }

    /// Most recently detected regime for `index`, without recomputing.
    pub fn current(&self, index: &str) -> Option<RegimeState> {
        self.state.read().get(index).cloned()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}
