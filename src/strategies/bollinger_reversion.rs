// =============================================================================
// Bollinger Band Mean-Reversion Strategy
// =============================================================================
//
// SMA ± k·σ bands over the trailing window. A close at or below the lower
// band is a buy, at or above the upper band a sell; strength scales with the
// penetration depth relative to the band half-width.

use crate::indicators::bollinger::calculate_bollinger;
use crate::market_data::BarSeries;
use crate::strategies::Signal;

#[derive(Debug, Clone)]
pub struct BollingerReversionParams {
    pub period: usize,
    pub num_std: f64,
}

impl Default for BollingerReversionParams {
    fn default() -> Self {
        Self {
            period: 20,
            num_std: 2.0,
        }
    }
}

const WARMUP_MARGIN: usize = 5;

pub fn evaluate(params: &BollingerReversionParams, series: &BarSeries, symbol: &str) -> Signal {
    let min_bars = params.period + WARMUP_MARGIN;
    if series.len() < min_bars {
        return Signal::hold(format!(
            "{symbol}: insufficient bars for Bollinger ({} < {min_bars})",
            series.len()
        ));
    }

    let closes = series.closes();
    let bb = match calculate_bollinger(&closes, params.period, params.num_std) {
        Some(b) => b,
        None => return Signal::hold(format!("{symbol}: Bollinger not computable")),
    };
    let close = match series.last_close() {
        Some(c) => c,
        None => return Signal::hold(format!("{symbol}: no last close")),
    };

    let half_width = (bb.upper - bb.lower) / 2.0;
    if half_width <= 0.0 {
        // Flat window: bands collapse onto the SMA, nothing to revert from.
        return Signal::hold(format!("{symbol}: Bollinger bands collapsed"));
    }

    if close <= bb.lower {
        let depth = (bb.lower - close) / half_width;
        Signal::buy(
            0.4 + depth,
            format!(
                "{symbol}: close {:.2} at/below lower band {:.2}",
                close, bb.lower
            ),
        )
    } else if close >= bb.upper {
        let depth = (close - bb.upper) / half_width;
        Signal::sell(
            0.4 + depth,
            format!(
                "{symbol}: close {:.2} at/above upper band {:.2}",
                close, bb.upper
            ),
        )
    } else {
        Signal::hold(format!("{symbol}: close inside bands"))
    }
}
