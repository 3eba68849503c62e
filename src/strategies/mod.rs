// =============================================================================
// Strategy Set — pure, stateless signal generators
// =============================================================================
//
// Each strategy maps `(BarSeries, symbol) -> Signal` and guarantees:
//   (a) the input is never mutated,
//   (b) insufficient data or any numeric trouble yields a hold-signal —
//       strategies never propagate errors to the caller,
//   (c) identical input produces identical output.
//
// Strategies are represented as a sum type with a uniform `evaluate`; the
// aggregator treats every variant alike.
// =============================================================================

pub mod bollinger_reversion;
pub mod ma_crossover;
pub mod momentum;
pub mod rsi_reversal;
pub mod volume_breakout;

use serde::{Deserialize, Serialize};

use crate::market_data::BarSeries;

pub use bollinger_reversion::BollingerReversionParams;
pub use ma_crossover::MaCrossoverParams;
pub use momentum::MomentumParams;
pub use rsi_reversal::RsiReversalParams;
pub use volume_breakout::VolumeBreakoutParams;

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Output of a single strategy evaluation.
///
/// Invariant: `direction == 0` implies `strength == 0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// -1 (sell), 0 (hold), or +1 (buy).
    pub direction: i8,
    /// Conviction in [0, 1].
    pub strength: f64,
    /// Human-readable cause, carried through aggregation into trade records.
    pub reason: String,
}

impl Signal {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            direction: 0,
            strength: 0.0,
            reason: reason.into(),
        }
    }

    pub fn buy(strength: f64, reason: impl Into<String>) -> Self {
        Self {
            direction: 1,
            strength: clamp_strength(strength),
            reason: reason.into(),
        }
    }

    pub fn sell(strength: f64, reason: impl Into<String>) -> Self {
        Self {
            direction: -1,
            strength: clamp_strength(strength),
            reason: reason.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.direction == 0
    }
}

/// Clamp into [0, 1]; non-finite values collapse to 0 (the caller will have
/// produced a hold-equivalent anyway).
fn clamp_strength(strength: f64) -> f64 {
    if !strength.is_finite() {
        return 0.0;
    }
    strength.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Strategy sum type
// ---------------------------------------------------------------------------

/// The configured strategy set, one variant per kind.
#[derive(Debug, Clone)]
pub enum Strategy {
    MaCrossover(MaCrossoverParams),
    RsiReversal(RsiReversalParams),
    BollingerReversion(BollingerReversionParams),
    VolumeBreakout(VolumeBreakoutParams),
    Momentum(MomentumParams),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MaCrossover(_) => "ma_crossover",
            Self::RsiReversal(_) => "rsi_reversal",
            Self::BollingerReversion(_) => "bollinger_reversion",
            Self::VolumeBreakout(_) => "volume_breakout",
            Self::Momentum(_) => "momentum",
        }
    }

    /// Evaluate the strategy on a bar series. Never fails; returns a
    /// hold-signal on insufficient data.
    pub fn evaluate(&self, series: &BarSeries, symbol: &str) -> Signal {
        match self {
            Self::MaCrossover(p) => ma_crossover::evaluate(p, series, symbol),
            Self::RsiReversal(p) => rsi_reversal::evaluate(p, series, symbol),
            Self::BollingerReversion(p) => bollinger_reversion::evaluate(p, series, symbol),
            Self::VolumeBreakout(p) => volume_breakout::evaluate(p, series, symbol),
            Self::Momentum(p) => momentum::evaluate(p, series, symbol),
        }
    }

    /// The standard five-strategy set with default parameters.
    pub fn default_set() -> Vec<Strategy> {
        vec![
            Self::MaCrossover(MaCrossoverParams::default()),
            Self::RsiReversal(RsiReversalParams::default()),
            Self::BollingerReversion(BollingerReversionParams::default()),
            Self::VolumeBreakout(VolumeBreakoutParams::default()),
            Self::Momentum(MomentumParams::default()),
        ]
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_signal_invariant() {
        let s = Signal::hold("insufficient data");
        assert_eq!(s.direction, 0);
        assert_eq!(s.strength, 0.0);
        assert!(s.is_hold());
    }

    #[test]
    fn strength_is_clamped() {
        assert_eq!(Signal::buy(1.7, "x").strength, 1.0);
        assert_eq!(Signal::sell(-0.3, "x").strength, 0.0);
        assert_eq!(Signal::buy(f64::NAN, "x").strength, 0.0);
    }

    #[test]
    fn every_strategy_holds_on_empty_series() {
        let empty = BarSeries::empty();
        for strategy in Strategy::default_set() {
            let signal = strategy.evaluate(&empty, "TCS");
            assert!(
                signal.is_hold(),
                "{} did not hold on empty input",
                strategy.name()
            );
            assert_eq!(signal.strength, 0.0);
        }
    }

    #[test]
    fn default_set_has_five_distinct_names() {
        let set = Strategy::default_set();
        assert_eq!(set.len(), 5);
        let mut names: Vec<&str> = set.iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn evaluation_is_deterministic() {
        use crate::market_data::Bar;
        let bars: Vec<Bar> = (0..120)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05;
                Bar {
                    timestamp: 1_700_000_000 + i * 300,
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.2,
                    volume: 10_000.0 + (i as f64 * 13.0) % 5_000.0,
                }
            })
            .collect();
        let series = BarSeries::from_bars("TCS", bars).unwrap();
        for strategy in Strategy::default_set() {
            let a = strategy.evaluate(&series, "TCS");
            let b = strategy.evaluate(&series, "TCS");
            assert_eq!(a, b, "{} is not deterministic", strategy.name());
        }
    }
}
