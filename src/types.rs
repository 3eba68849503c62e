// =============================================================================
// Shared types used across the Vajra trading engine
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How orders reach the market: simulated fills, historical replay, or the
/// live broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
    Backtest,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
            Self::Backtest => write!(f, "backtest"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Aggregated decision for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Option right: call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    CE,
    PE,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CE => write!(f, "CE"),
            Self::PE => write!(f, "PE"),
        }
    }
}

/// Derivatives segment the contract trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivExchange {
    NFO,
    BFO,
}

impl std::fmt::Display for DerivExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NFO => write!(f, "NFO"),
            Self::BFO => write!(f, "BFO"),
        }
    }
}

/// Validate an equity trading symbol: 2–20 uppercase alphanumerics.
///
/// Symbols with `&` or `-` (e.g. "M&M") are normalised upstream before they
/// reach the engine; by the time a symbol is here it must match this shape.
pub fn is_valid_equity_symbol(symbol: &str) -> bool {
    let len = symbol.len();
    if !(2..=20).contains(&len) {
        return false;
    }
    symbol
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// A single exchange-traded option contract.
///
/// The canonical trading-symbol string form (`NIFTY25AUG24500CE`) is what the
/// broker API accepts for order placement and quote lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    pub right: OptionRight,
    pub exchange: DerivExchange,
}

impl OptionContract {
    /// Canonical broker trading symbol: `{UNDERLYING}{YY}{MON}{STRIKE}{CE|PE}`.
    pub fn trading_symbol(&self) -> String {
        use chrono::Datelike;
        let yy = self.expiry.year() % 100;
        let mon = month_abbrev(self.expiry.month());
        format!(
            "{}{:02}{}{}{}",
            self.underlying, yy, mon, self.strike as i64, self.right
        )
    }
}

impl std::fmt::Display for OptionContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.trading_symbol())
    }
}

fn month_abbrev(month: u32) -> &'static str {
    match month {
        1 => "JAN",
        2 => "FEB",
        3 => "MAR",
        4 => "APR",
        5 => "MAY",
        6 => "JUN",
        7 => "JUL",
        8 => "AUG",
        9 => "SEP",
        10 => "OCT",
        11 => "NOV",
        _ => "DEC",
    }
}
