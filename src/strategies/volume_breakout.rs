// =============================================================================
// Volume Breakout Strategy
// =============================================================================
//
// A directional move on unusually heavy volume suggests real participation
// rather than noise. Fires when the latest bar's volume exceeds the trailing
// average by a configured multiple AND the close moved by more than a minimum
// percentage; the move's sign gives the direction.

use crate::indicators::mean;
use crate::market_data::BarSeries;
use crate::strategies::Signal;

#[derive(Debug, Clone)]
pub struct VolumeBreakoutParams {
    /// Trailing bars used for the average-volume baseline.
    pub lookback: usize,
    /// Latest volume must exceed baseline by this multiple.
    pub volume_multiple: f64,
    /// Minimum close-to-close move, as a fraction (0.002 = 0.2 %).
    pub min_move_pct: f64,
}

impl Default for VolumeBreakoutParams {
    fn default() -> Self {
        Self {
            lookback: 20,
            volume_multiple: 2.0,
            min_move_pct: 0.002,
        }
    }
}

pub fn evaluate(params: &VolumeBreakoutParams, series: &BarSeries, symbol: &str) -> Signal {
    // The baseline excludes the breakout bar itself, so we need lookback + 1.
    let min_bars = params.lookback.max(20) + 1;
    if series.len() < min_bars {
        return Signal::hold(format!(
            "{symbol}: insufficient bars for volume breakout ({} < {min_bars})",
            series.len()
        ));
    }

    let bars = series.bars();
    let latest = bars[bars.len() - 1];
    let prev = bars[bars.len() - 2];

    let baseline_window = &bars[bars.len() - 1 - params.lookback..bars.len() - 1];
    let baseline_vols: Vec<f64> = baseline_window.iter().map(|b| b.volume).collect();
    let avg_volume = match mean(&baseline_vols) {
        Some(v) if v > 0.0 => v,
        _ => return Signal::hold(format!("{symbol}: no volume baseline")),
    };

    let volume_ratio = latest.volume / avg_volume;
    if prev.close == 0.0 {
        return Signal::hold(format!("{symbol}: degenerate previous close"));
    }
    let move_pct = (latest.close - prev.close) / prev.close;

    if volume_ratio >= params.volume_multiple && move_pct.abs() >= params.min_move_pct {
        // Strength blends volume surprise and move size.
        let vol_component = ((volume_ratio / params.volume_multiple) - 1.0).min(1.0) * 0.5;
        let move_component = (move_pct.abs() / (params.min_move_pct * 5.0)).min(1.0) * 0.5;
        let strength = 0.3 + vol_component + move_component;
        let reason = format!(
            "{symbol}: volume {volume_ratio:.1}x avg with {:.2}% move",
            move_pct * 100.0
        );
        if move_pct > 0.0 {
            Signal::buy(strength, reason)
        } else {
            Signal::sell(strength, reason)
        }
    } else {
        Signal::hold(format!(
            "{symbol}: volume {volume_ratio:.1}x / move {:.2}% below breakout bar",
            move_pct * 100.0
        ))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;

    fn series(closes_and_vols: &[(f64, f64)]) -> BarSeries {
        let bars: Vec<Bar> = closes_and_vols
            .iter()
            .enumerate()
            .map(|(i, &(c, v))| Bar {
                timestamp: 1_700_000_000 + i as i64 * 300,
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: v,
            })
            .collect();
        BarSeries::from_bars("TEST", bars).unwrap()
    }

    fn quiet_baseline(n: usize) -> Vec<(f64, f64)> {
        (0..n).map(|_| (100.0, 1_000.0)).collect()
    }

    #[test]
    fn holds_on_insufficient_data() {
        let data = quiet_baseline(10);
        assert!(evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST").is_hold());
    }

    #[test]
    fn upside_breakout_buys() {
        let mut data = quiet_baseline(25);
        data.push((101.0, 5_000.0)); // +1 % on 5x volume
        let signal = evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST");
        assert_eq!(signal.direction, 1, "reason: {}", signal.reason);
        assert!(signal.strength > 0.3);
    }

    #[test]
    fn downside_breakout_sells() {
        let mut data = quiet_baseline(25);
        data.push((99.0, 5_000.0));
        let signal = evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST");
        assert_eq!(signal.direction, -1, "reason: {}", signal.reason);
    }

    #[test]
    fn heavy_volume_without_move_holds() {
        let mut data = quiet_baseline(25);
        data.push((100.05, 5_000.0)); // 0.05 % move — below the floor
        let signal = evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST");
        assert!(signal.is_hold(), "reason: {}", signal.reason);
    }

    #[test]
    fn big_move_on_thin_volume_holds() {
        let mut data = quiet_baseline(25);
        data.push((103.0, 1_100.0)); // 3 % move on ordinary volume
        let signal = evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST");
        assert!(signal.is_hold(), "reason: {}", signal.reason);
    }

    #[test]
    fn zero_volume_baseline_holds() {
        let mut data: Vec<(f64, f64)> = (0..25).map(|_| (100.0, 0.0)).collect();
        data.push((101.0, 5_000.0));
        let signal = evaluate(&VolumeBreakoutParams::default(), &series(&data), "TEST");
        assert!(signal.is_hold());
    }
}
