// =============================================================================
// Signal Aggregator — multi-strategy voting with weighted agreement
// =============================================================================
//
// Combines N strategy outputs into one decision:
//
//   buy_agreement  = |buys|  / |signals|
//   sell_agreement = |sells| / |signals|
//   side_confidence = mean(strengths of that side)
//
// A side qualifies when its agreement fraction clears the agreement
// threshold AND its mean strength clears the confidence floor. The final
// confidence blends strength with breadth:
//
//   final = side_confidence * (0.6 + 0.4 * side_agreement)
//
// When both sides qualify (contradictory strategy set), the side with the
// higher weighted confidence wins. Exits use a lower agreement threshold so
// positions can unwind in weaker conditions than those required to enter.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::strategies::Signal;
use crate::types::Action;

/// Thresholds a side must clear to produce a non-hold action.
#[derive(Debug, Clone, Copy)]
pub struct AggregationThresholds {
    /// Fraction of all strategies that must agree on the side.
    pub agreement: f64,
    /// Floor on the side's mean strength.
    pub min_confidence: f64,
}

/// Combined decision for one symbol.
///
/// Invariant: `action == Hold` implies `confidence == 0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub atr: Option<f64>,
    pub last_close: Option<f64>,
}

impl AggregatedSignal {
    pub fn hold(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: Action::Hold,
            confidence: 0.0,
            reasons: Vec::new(),
            atr: None,
            last_close: None,
        }
    }

    fn hold_with_context(symbol: &str, atr: Option<f64>, last_close: Option<f64>) -> Self {
        Self {
            atr,
            last_close,
            ..Self::hold(symbol)
        }
    }
}

/// Aggregate strategy signals for `symbol` under the given thresholds.
///
/// `atr` and `last_close` are carried through for downstream sizing; they do
/// not influence the vote.
pub fn aggregate(
    signals: &[Signal],
    symbol: &str,
    thresholds: &AggregationThresholds,
    atr: Option<f64>,
    last_close: Option<f64>,
) -> AggregatedSignal {
    if signals.is_empty() {
        return AggregatedSignal::hold(symbol);
    }

    let total = signals.len() as f64;
    let buys: Vec<&Signal> = signals.iter().filter(|s| s.direction > 0).collect();
    let sells: Vec<&Signal> = signals.iter().filter(|s| s.direction < 0).collect();

    let side_stats = |side: &[&Signal]| -> (f64, f64) {
        if side.is_empty() {
            return (0.0, 0.0);
        }
        let agreement = side.len() as f64 / total;
        let confidence = side.iter().map(|s| s.strength).sum::<f64>() / side.len() as f64;
        (agreement, confidence)
    };

    let (buy_agreement, buy_confidence) = side_stats(&buys);
    let (sell_agreement, sell_confidence) = side_stats(&sells);

    let buy_qualifies =
        buy_agreement >= thresholds.agreement && buy_confidence >= thresholds.min_confidence;
    let sell_qualifies =
        sell_agreement >= thresholds.agreement && sell_confidence >= thresholds.min_confidence;

    let weighted = |confidence: f64, agreement: f64| confidence * (0.6 + 0.4 * agreement);

    let buy_final = weighted(buy_confidence, buy_agreement);
    let sell_final = weighted(sell_confidence, sell_agreement);

    let (action, confidence, winners) = match (buy_qualifies, sell_qualifies) {
        (true, false) => (Action::Buy, buy_final, buys),
        (false, true) => (Action::Sell, sell_final, sells),
        (true, true) => {
            // Contradictory set: the stronger weighted side wins.
            if buy_final >= sell_final {
                (Action::Buy, buy_final, buys)
            } else {
                (Action::Sell, sell_final, sells)
            }
        }
        (false, false) => return AggregatedSignal::hold_with_context(symbol, atr, last_close),
    };

    AggregatedSignal {
        symbol: symbol.to_string(),
        action,
        confidence: confidence.clamp(0.0, 1.0),
        reasons: winners.iter().map(|s| s.reason.clone()).collect(),
        atr,
        last_close,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AggregationThresholds {
        AggregationThresholds {
            agreement: 0.4,
            min_confidence: 0.45,
        }
    }

    fn exit_thresholds() -> AggregationThresholds {
        AggregationThresholds {
            agreement: 0.25,
            min_confidence: 0.25,
        }
    }

    #[test]
    fn empty_signals_hold() {
        let agg = aggregate(&[], "TCS", &thresholds(), None, None);
        assert_eq!(agg.action, Action::Hold);
        assert_eq!(agg.confidence, 0.0);
    }

    #[test]
    fn all_holds_produce_hold() {
        let signals = vec![Signal::hold("a"), Signal::hold("b"), Signal::hold("c")];
        let agg = aggregate(&signals, "TCS", &thresholds(), None, None);
        assert_eq!(agg.action, Action::Hold);
        assert_eq!(agg.confidence, 0.0);
        assert!(agg.reasons.is_empty());
    }

    #[test]
    fn strong_majority_buys() {
        let signals = vec![
            Signal::buy(0.8, "s1 bullish"),
            Signal::buy(0.6, "s2 bullish"),
            Signal::buy(0.7, "s3 bullish"),
            Signal::hold("s4 quiet"),
            Signal::hold("s5 quiet"),
        ];
        let agg = aggregate(&signals, "TCS", &thresholds(), Some(2.0), Some(100.0));
        assert_eq!(agg.action, Action::Buy);
        // mean=0.7, agreement=0.6 -> 0.7 * (0.6 + 0.24) = 0.588
        assert!((agg.confidence - 0.588).abs() < 1e-9);
        assert_eq!(agg.reasons.len(), 3);
        assert_eq!(agg.atr, Some(2.0));
        assert_eq!(agg.last_close, Some(100.0));
    }

    #[test]
    fn weak_agreement_holds() {
        // 1 of 5 buying: agreement 0.2 < 0.4.
        let signals = vec![
            Signal::buy(0.9, "s1"),
            Signal::hold("s2"),
            Signal::hold("s3"),
            Signal::hold("s4"),
            Signal::hold("s5"),
        ];
        let agg = aggregate(&signals, "TCS", &thresholds(), None, None);
        assert_eq!(agg.action, Action::Hold);
    }

    #[test]
    fn weak_confidence_holds() {
        // Plenty of agreement but below the strength floor.
        let signals = vec![
            Signal::buy(0.2, "s1"),
            Signal::buy(0.3, "s2"),
            Signal::buy(0.2, "s3"),
        ];
        let agg = aggregate(&signals, "TCS", &thresholds(), None, None);
        assert_eq!(agg.action, Action::Hold);
    }

    #[test]
    fn tie_broken_by_weighted_confidence() {
        let signals = vec![
            Signal::buy(0.9, "strong buy"),
            Signal::buy(0.9, "strong buy"),
            Signal::sell(0.5, "weak sell"),
            Signal::sell(0.5, "weak sell"),
        ];
        let agg = aggregate(&signals, "TCS", &exit_thresholds(), None, None);
        assert_eq!(agg.action, Action::Buy);
    }

    #[test]
    fn exit_thresholds_admit_weaker_sells() {
        // 2 of 5 selling at modest strength: fails entry thresholds, passes
        // exit thresholds.
        let signals = vec![
            Signal::sell(0.35, "s1 fading"),
            Signal::sell(0.30, "s2 fading"),
            Signal::hold("s3"),
            Signal::hold("s4"),
            Signal::hold("s5"),
        ];
        let entry = aggregate(&signals, "TCS", &thresholds(), None, None);
        assert_eq!(entry.action, Action::Hold);

        let exit = aggregate(&signals, "TCS", &exit_thresholds(), None, None);
        assert_eq!(exit.action, Action::Sell);
        assert!(exit.confidence > 0.0);
    }

    #[test]
    fn full_agreement_full_strength() {
        let signals = vec![Signal::buy(1.0, "a"), Signal::buy(1.0, "b")];
        let agg = aggregate(&signals, "TCS", &thresholds(), None, None);
        assert_eq!(agg.action, Action::Buy);
        assert!((agg.confidence - 1.0).abs() < 1e-9);
    }
}
