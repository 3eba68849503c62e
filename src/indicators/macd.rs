// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA_fast(closes) - EMA_slow(closes)
// Signal     = EMA_signal(MACD line)
// Histogram  = MACD line - Signal
//
// Standard parameters: fast=12, slow=26, signal=9.

use crate::indicators::ema::calculate_ema;

/// Most recent MACD reading.
#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD line / signal / histogram values.
///
/// Returns `None` when there is not enough data for the slow EMA plus the
/// signal EMA, or when `fast >= slow`.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || signal_period == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal_period {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_slow.is_empty() {
        return None;
    }

    // Align the two series on their tails: both end at the last close.
    let len = ema_slow.len().min(ema_fast.len());
    let fast_tail = &ema_fast[ema_fast.len() - len..];
    let slow_tail = &ema_slow[ema_slow.len() - len..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd = *macd_line.last()?;
    let histogram = macd - signal;

    (macd.is_finite() && signal.is_finite()).then_some(MacdResult {
        macd,
        signal,
        histogram,
    })
}

/// MACD with the standard 12/26/9 parameters.
pub fn standard_macd(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}
