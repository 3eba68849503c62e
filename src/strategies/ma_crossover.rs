// =============================================================================
// Moving-Average Crossover Strategy
// =============================================================================
//
// Compares a short EMA against a long EMA:
//   - A fresh cross (short moving through long on the latest bar) is the
//     strongest event; strength scales with the separation between the EMAs.
//   - An established trend (short persistently above/below long) produces the
//     same direction at reduced strength, so the aggregator can still count
//     trend-following agreement without overweighting stale crosses.

use crate::indicators::ema::{calculate_ema, ema_relation, EmaRelation};
use crate::market_data::BarSeries;
use crate::strategies::Signal;

#[derive(Debug, Clone)]
pub struct MaCrossoverParams {
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            short_period: 12,
            long_period: 26,
        }
    }
}

/// Bars required beyond the long period before the strategy will speak.
const WARMUP_MARGIN: usize = 5;

/// Scale factor converting EMA separation (fraction of long EMA) into
/// strength for a fresh cross.
const CROSS_STRENGTH_SCALE: f64 = 30.0;

/// Trend-following signals are capped well below cross events.
const TREND_STRENGTH_CAP: f64 = 0.5;

pub fn evaluate(params: &MaCrossoverParams, series: &BarSeries, symbol: &str) -> Signal {
    let min_bars = params.long_period + WARMUP_MARGIN;
    if series.len() < min_bars || params.short_period >= params.long_period {
        return Signal::hold(format!(
            "{symbol}: insufficient bars for MA crossover ({} < {min_bars})",
            series.len()
        ));
    }

    let closes = series.closes();
    let short = calculate_ema(&closes, params.short_period);
    let long = calculate_ema(&closes, params.long_period);

    let relation = match ema_relation(&short, &long) {
        Some(r) => r,
        None => return Signal::hold(format!("{symbol}: EMA series too short")),
    };

    let (s_now, l_now) = match (short.last(), long.last()) {
        (Some(&s), Some(&l)) if l != 0.0 => (s, l),
        _ => return Signal::hold(format!("{symbol}: degenerate EMA values")),
    };
    let separation = ((s_now - l_now) / l_now).abs();
    if !separation.is_finite() {
        return Signal::hold(format!("{symbol}: non-finite EMA separation"));
    }

    match relation {
        EmaRelation::CrossedUp => Signal::buy(
            0.55 + separation * CROSS_STRENGTH_SCALE,
            format!(
                "{symbol}: EMA{} crossed above EMA{} (sep {:.3}%)",
                params.short_period,
                params.long_period,
                separation * 100.0
            ),
        ),
        EmaRelation::CrossedDown => Signal::sell(
            0.55 + separation * CROSS_STRENGTH_SCALE,
            format!(
                "{symbol}: EMA{} crossed below EMA{} (sep {:.3}%)",
                params.short_period,
                params.long_period,
                separation * 100.0
            ),
        ),
        EmaRelation::Above => Signal::buy(
            (0.2 + separation * CROSS_STRENGTH_SCALE).min(TREND_STRENGTH_CAP),
            format!("{symbol}: uptrend, EMA{} above EMA{}", params.short_period, params.long_period),
        ),
        EmaRelation::Below => Signal::sell(
            (0.2 + separation * CROSS_STRENGTH_SCALE).min(TREND_STRENGTH_CAP),
            format!("{symbol}: downtrend, EMA{} below EMA{}", params.short_period, params.long_period),
        ),
        EmaRelation::Flat => Signal::hold(format!("{symbol}: EMAs flat")),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;

    fn series_from_closes(closes: &[f64]) -> BarSeries {
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: 1_700_000_000 + i as i64 * 300,
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 1_000.0,
            })
            .collect();
        BarSeries::from_bars("TEST", bars).unwrap()
    }

    #[test]
    fn holds_on_insufficient_data() {
        let series = series_from_closes(&[100.0; 10]);
        let signal = evaluate(&MaCrossoverParams::default(), &series, "TEST");
        assert!(signal.is_hold());
    }

    #[test]
    fn uptrend_produces_buy() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.5).collect();
        let series = series_from_closes(&closes);
        let signal = evaluate(&MaCrossoverParams::default(), &series, "TEST");
        assert_eq!(signal.direction, 1, "reason: {}", signal.reason);
        assert!(signal.strength > 0.0);
        assert!(signal.strength <= 0.5, "trend strength is capped");
    }

    #[test]
    fn downtrend_produces_sell() {
        let closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64 * 0.5).collect();
        let series = series_from_closes(&closes);
        let signal = evaluate(&MaCrossoverParams::default(), &series, "TEST");
        assert_eq!(signal.direction, -1, "reason: {}", signal.reason);
    }

    #[test]
    fn fresh_cross_up_stronger_than_trend() {
        // Long decline, then a sharp reversal that drags the short EMA
        // through the long EMA on the final bar.
        let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        closes.extend((0..14).map(|i| 141.0 + i as f64 * 8.0));
        let series = series_from_closes(&closes);
        let signal = evaluate(&MaCrossoverParams::default(), &series, "TEST");
        if signal.direction == 1 && signal.reason.contains("crossed above") {
            assert!(signal.strength >= 0.55);
        }
        // Either way the direction must not be sell after such a reversal.
        assert_ne!(signal.direction, -1, "reason: {}", signal.reason);
    }

    #[test]
    fn flat_market_holds() {
        let series = series_from_closes(&vec![100.0; 80]);
        let signal = evaluate(&MaCrossoverParams::default(), &series, "TEST");
        assert!(signal.is_hold(), "reason: {}", signal.reason);
    }

    #[test]
    fn inverted_periods_hold() {
        let params = MaCrossoverParams {
            short_period: 26,
            long_period: 12,
        };
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let series = series_from_closes(&closes);
        assert!(evaluate(&params, &series, "TEST").is_hold());
    }
}
