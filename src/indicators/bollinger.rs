// =============================================================================
// Bollinger Bands
// =============================================================================
//
// A middle band (SMA), an upper band (SMA + k*σ), and a lower band
// (SMA - k*σ). The Band Width (BBW) is the normalised distance:
// BBW = (upper - lower) / middle * 100.

use crate::indicators::{mean, std_dev};

/// Result of a Bollinger Band calculation over the trailing window.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

/// Calculate Bollinger Bands over the trailing `period` closes.
///
/// Returns `None` when:
/// - Fewer than `period` data points or `period == 0`.
/// - Middle band is zero (degenerate input).
/// - Any component is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = mean(window)?;
    if middle == 0.0 {
        return None;
    }

    let sd = std_dev(window)?;
    let upper = middle + num_std * sd;
    let lower = middle - num_std * sd;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerResult {
        upper,
        middle,
        lower,
        width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width > 0.0);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_series_has_zero_width() {
        let closes = vec![100.0; 20];
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.width.abs() < 1e-10);
        assert!((bb.upper - bb.lower).abs() < 1e-10);
    }

    #[test]
    fn bollinger_uses_trailing_window_only() {
        // Early junk values must not affect the trailing window.
        let mut closes = vec![1_000_000.0; 5];
        closes.extend(std::iter::repeat(100.0).take(20));
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.middle - 100.0).abs() < 1e-10);
    }
}
