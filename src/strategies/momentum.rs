// =============================================================================
// Composite Momentum Strategy
// =============================================================================
//
// Blends five momentum reads into a weighted score in [-1, 1]:
//
//   ROC          — medium-horizon percentage change
//   RSI          — positioned against the 50 midline (not the reversal bands)
//   MACD         — histogram sign and magnitude
//   Trend slope  — normalised least-squares slope of the window
//   Acceleration — slope steepening/flattening between window halves
//
// The strategy only fires when the weighted score clears a threshold AND no
// component votes hard against it; mixed momentum is treated as noise.

use crate::indicators::macd::standard_macd;
use crate::indicators::roc::current_roc;
use crate::indicators::rsi::current_rsi;
use crate::indicators::trend::{normalized_slope, slope_acceleration};
use crate::market_data::BarSeries;
use crate::strategies::Signal;

#[derive(Debug, Clone)]
pub struct MomentumParams {
    pub roc_period: usize,
    pub rsi_period: usize,
    /// Window for slope and acceleration (most recent bars).
    pub trend_window: usize,
    /// Minimum |score| required to fire.
    pub score_threshold: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            roc_period: 14,
            rsi_period: 14,
            trend_window: 30,
            score_threshold: 0.5,
        }
    }
}

const WARMUP_MARGIN: usize = 10;

/// Component weights; sum to 1.0.
const W_ROC: f64 = 0.25;
const W_RSI: f64 = 0.20;
const W_MACD: f64 = 0.25;
const W_SLOPE: f64 = 0.20;
const W_ACCEL: f64 = 0.10;

/// A single component vote disagreeing harder than this kills the signal.
const VETO_LEVEL: f64 = -0.5;

pub fn evaluate(params: &MomentumParams, series: &BarSeries, symbol: &str) -> Signal {
    // MACD needs 26 + 9 bars; take the max of all component demands.
    let min_bars = [params.roc_period, params.rsi_period, params.trend_window, 35]
        .into_iter()
        .max()
        .unwrap_or(35)
        + WARMUP_MARGIN;
    if series.len() < min_bars {
        return Signal::hold(format!(
            "{symbol}: insufficient bars for momentum ({} < {min_bars})",
            series.len()
        ));
    }

    let closes = series.closes();

    // Each component is normalised into [-1, 1].
    let roc_vote = match current_roc(&closes, params.roc_period) {
        Some(roc) => (roc / 5.0).clamp(-1.0, 1.0),
        None => return Signal::hold(format!("{symbol}: ROC not computable")),
    };

    let rsi_vote = match current_rsi(&closes, params.rsi_period) {
        Some(rsi) => ((rsi - 50.0) / 25.0).clamp(-1.0, 1.0),
        None => return Signal::hold(format!("{symbol}: RSI not computable")),
    };

    let macd_vote = match standard_macd(&closes) {
        Some(m) => {
            let last_close = closes.last().copied().unwrap_or(0.0);
            if last_close == 0.0 {
                return Signal::hold(format!("{symbol}: degenerate close"));
            }
            // Histogram as a fraction of price, scaled so ~0.5 % saturates.
            (m.histogram / last_close * 200.0).clamp(-1.0, 1.0)
        }
        None => return Signal::hold(format!("{symbol}: MACD not computable")),
    };

    let window = &closes[closes.len() - params.trend_window.min(closes.len())..];
    let slope_vote = match normalized_slope(window) {
        Some(s) => (s * 500.0).clamp(-1.0, 1.0),
        None => return Signal::hold(format!("{symbol}: slope not computable")),
    };
    let accel_vote = slope_acceleration(window)
        .map(|a| (a * 500.0).clamp(-1.0, 1.0))
        .unwrap_or(0.0);

    let score = W_ROC * roc_vote
        + W_RSI * rsi_vote
        + W_MACD * macd_vote
        + W_SLOPE * slope_vote
        + W_ACCEL * accel_vote;

    let votes = [roc_vote, rsi_vote, macd_vote, slope_vote];

    if score >= params.score_threshold && votes.iter().all(|&v| v > VETO_LEVEL) {
        Signal::buy(
            score,
            format!(
                "{symbol}: momentum aligned (score {score:.2}; roc {roc_vote:.2}, rsi {rsi_vote:.2}, macd {macd_vote:.2}, slope {slope_vote:.2})"
            ),
        )
    } else if score <= -params.score_threshold && votes.iter().all(|&v| v < -VETO_LEVEL) {
        Signal::sell(
            -score,
            format!(
                "{symbol}: momentum aligned down (score {score:.2}; roc {roc_vote:.2}, rsi {rsi_vote:.2}, macd {macd_vote:.2}, slope {slope_vote:.2})"
            ),
        )
    } else {
        Signal::hold(format!("{symbol}: momentum mixed (score {score:.2})"))
    }
}
