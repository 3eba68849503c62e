// =============================================================================
// RSI Reversal Strategy
// =============================================================================
//
// Wilder RSI against fixed thresholds: at or below the oversold line the
// strategy buys, at or above the overbought line it sells, with strength
// proportional to how deep the excursion runs past the threshold.

use crate::indicators::rsi::current_rsi;
use crate::market_data::BarSeries;
use crate::strategies::Signal;

#[derive(Debug, Clone)]
pub struct RsiReversalParams {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiReversalParams {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

const WARMUP_MARGIN: usize = 5;

pub fn evaluate(params: &RsiReversalParams, series: &BarSeries, symbol: &str) -> Signal {
    let min_bars = params.period + WARMUP_MARGIN;
    if series.len() < min_bars {
        return Signal::hold(format!(
            "{symbol}: insufficient bars for RSI ({} < {min_bars})",
            series.len()
        ));
    }
    if params.oversold >= params.overbought {
        return Signal::hold(format!("{symbol}: inverted RSI thresholds"));
    }

    let closes = series.closes();
    let rsi = match current_rsi(&closes, params.period) {
        Some(v) => v,
        None => return Signal::hold(format!("{symbol}: RSI not computable")),
    };

    if rsi <= params.oversold {
        // Depth below the threshold, normalised by the room available.
        let strength = ((params.oversold - rsi) / params.oversold).max(0.1);
        Signal::buy(
            strength,
            format!("{symbol}: RSI {:.1} oversold (<= {:.0})", rsi, params.oversold),
        )
    } else if rsi >= params.overbought {
        let strength = ((rsi - params.overbought) / (100.0 - params.overbought)).max(0.1);
        Signal::sell(
            strength,
            format!(
                "{symbol}: RSI {:.1} overbought (>= {:.0})",
                rsi, params.overbought
            ),
        )
    } else {
        Signal::hold(format!("{symbol}: RSI {:.1} neutral", rsi))
    }
}
