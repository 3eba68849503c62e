// =============================================================================
// Index Characteristics & Correlation Matrix
// =============================================================================
//
// Static per-index configuration for the F&O composer: contract economics,
// weekly expiry weekday, strike step, characteristic daily move, and the
// priority rank the scan respects (low rank first, so scarce capital commits
// to the highest-suitability index).
//
// The correlation matrix blocks a new index entry when a held index is
// correlated at or above the configured threshold.
// =============================================================================

use std::collections::HashMap;

use chrono::Weekday;

use crate::types::DerivExchange;

/// Contract economics and scan configuration for one index.
#[derive(Debug, Clone)]
pub struct IndexCharacteristics {
    pub symbol: String,
    pub exchange: DerivExchange,
    /// Rupees per index point per unit quantity.
    pub point_value: f64,
    pub lot_size: u32,
    pub margin_per_lot: f64,
    /// Characteristic average daily move, percent.
    pub avg_daily_move_pct: f64,
    /// Strike grid spacing.
    pub strike_step: f64,
    pub expiry_weekday: Weekday,
    /// Scan order: lower ranks are evaluated first.
    pub priority_rank: u8,
    pub atr_stop_multiplier: f64,
}

/// The standard six-index table.
pub fn default_index_table() -> Vec<IndexCharacteristics> {
    vec![
        IndexCharacteristics {
            symbol: "NIFTY".to_string(),
            exchange: DerivExchange::NFO,
            point_value: 1.0,
            lot_size: 75,
            margin_per_lot: 120_000.0,
            avg_daily_move_pct: 0.8,
            strike_step: 50.0,
            expiry_weekday: Weekday::Thu,
            priority_rank: 1,
            atr_stop_multiplier: 1.8,
        },
        IndexCharacteristics {
            symbol: "BANKNIFTY".to_string(),
            exchange: DerivExchange::NFO,
            point_value: 1.0,
            lot_size: 35,
            margin_per_lot: 160_000.0,
            avg_daily_move_pct: 1.1,
            strike_step: 100.0,
            expiry_weekday: Weekday::Wed,
            priority_rank: 2,
            atr_stop_multiplier: 2.0,
        },
        IndexCharacteristics {
            symbol: "SENSEX".to_string(),
            exchange: DerivExchange::BFO,
            point_value: 1.0,
            lot_size: 20,
            margin_per_lot: 140_000.0,
            avg_daily_move_pct: 0.8,
            strike_step: 100.0,
            expiry_weekday: Weekday::Fri,
            priority_rank: 3,
            atr_stop_multiplier: 1.8,
        },
        IndexCharacteristics {
            symbol: "FINNIFTY".to_string(),
            exchange: DerivExchange::NFO,
            point_value: 1.0,
            lot_size: 65,
            margin_per_lot: 110_000.0,
            avg_daily_move_pct: 0.9,
            strike_step: 50.0,
            expiry_weekday: Weekday::Tue,
            priority_rank: 4,
            atr_stop_multiplier: 1.9,
        },
        IndexCharacteristics {
            symbol: "MIDCPNIFTY".to_string(),
            exchange: DerivExchange::NFO,
            point_value: 1.0,
            lot_size: 140,
            margin_per_lot: 90_000.0,
            avg_daily_move_pct: 1.0,
            strike_step: 25.0,
            expiry_weekday: Weekday::Mon,
            priority_rank: 5,
            atr_stop_multiplier: 2.0,
        },
        IndexCharacteristics {
            symbol: "BANKEX".to_string(),
            exchange: DerivExchange::BFO,
            point_value: 1.0,
            lot_size: 30,
            margin_per_lot: 130_000.0,
            avg_daily_move_pct: 1.1,
            strike_step: 100.0,
            expiry_weekday: Weekday::Mon,
            priority_rank: 6,
            atr_stop_multiplier: 2.0,
        },
    ]
}

/// Symmetric pairwise correlation between index underlyings.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMatrix {
    pairs: HashMap<(String, String), f64>,
}

impl CorrelationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rho for an unordered pair. Values are clamped into [-1, 1].
    pub fn set(&mut self, a: &str, b: &str, rho: f64) {
        let key = Self::key(a, b);
        self.pairs.insert(key, rho.clamp(-1.0, 1.0));
    }

    /// rho for the pair; identical symbols are 1.0, unknown pairs 0.0.
    pub fn get(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        self.pairs.get(&Self::key(a, b)).copied().unwrap_or(0.0)
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Historical pairwise correlations for the standard index set.
    pub fn default_for_indices() -> Self {
        let mut m = Self::new();
        m.set("NIFTY", "SENSEX", 0.98);
        m.set("NIFTY", "BANKNIFTY", 0.85);
        m.set("NIFTY", "FINNIFTY", 0.92);
        m.set("NIFTY", "MIDCPNIFTY", 0.78);
        m.set("NIFTY", "BANKEX", 0.82);
        m.set("BANKNIFTY", "BANKEX", 0.97);
        m.set("BANKNIFTY", "FINNIFTY", 0.93);
        m.set("BANKNIFTY", "SENSEX", 0.84);
        m.set("BANKNIFTY", "MIDCPNIFTY", 0.72);
        m.set("SENSEX", "BANKEX", 0.83);
        m.set("SENSEX", "FINNIFTY", 0.90);
        m.set("SENSEX", "MIDCPNIFTY", 0.77);
        m.set("FINNIFTY", "BANKEX", 0.91);
        m.set("FINNIFTY", "MIDCPNIFTY", 0.74);
        m.set("MIDCPNIFTY", "BANKEX", 0.70);
        m
    }
}
