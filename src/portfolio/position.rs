// =============================================================================
// Positions and trade records
// =============================================================================
//
// `Position` is a simple long holding; multi-leg option structures are a
// `StructuredGroup` naming its leg positions, which the portfolio enters and
// exits atomically but marks to market per leg.
//
// `Trade` is an immutable, append-only record; once written it never changes.
// Trades reference positions by symbol + timestamp, never by pointer.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::ProductType;
use crate::types::{Side, TradingMode};

/// A single open holding. Owned exclusively by the portfolio; all mutation
/// happens under the portfolio lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Always positive; a position at zero shares is deleted, never stored.
    pub shares: u32,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// May only ratchet upward (trailing); never loosened.
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64,
    pub sector: String,
    #[serde(default)]
    pub atr: Option<f64>,
    #[serde(default)]
    pub lot_size: Option<u32>,
    pub product: ProductType,
}

impl Position {
    /// Entry-time invariant for longs.
    pub fn bounds_valid(&self) -> bool {
        self.stop_loss > 0.0
            && self.stop_loss < self.entry_price
            && self.entry_price < self.take_profit
    }

    /// Mark-to-market value at `price`.
    pub fn value_at(&self, price: f64) -> f64 {
        f64::from(self.shares) * price
    }
}

/// Why a position was (or is being) exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    DayEndClose,
    MarketClose,
    Manual,
}

impl ExitReason {
    /// Risk and day-end exits bypass the minimum holding period.
    pub fn bypasses_holding_period(&self) -> bool {
        matches!(
            self,
            Self::StopLoss | Self::TakeProfit | Self::TrailingStop | Self::DayEndClose | Self::MarketClose
        )
    }

    /// Stop-loss exits earn the longer cooldown.
    pub fn is_stop_loss(&self) -> bool {
        matches!(self, Self::StopLoss)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Signal => "signal",
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingStop => "trailing_stop",
            Self::DayEndClose => "day_end_close",
            Self::MarketClose => "market_close",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Immutable record of one executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub shares: u32,
    pub price: f64,
    pub fees: f64,
    /// Realized PnL; `None` on entries.
    pub pnl: Option<f64>,
    pub mode: TradingMode,
    pub confidence: f64,
    pub sector: String,
    pub cash_balance_after: f64,
    #[serde(default)]
    pub atr: Option<f64>,
    pub trading_day: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
    /// Shared across the legs of a multi-leg F&O transaction.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// One leg of a multi-leg option structure.
///
/// Long (buy) legs also exist as ordinary positions in the portfolio map;
/// short (sell-to-open) legs live only here, with `closed` flipping when the
/// leg is bought back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupLeg {
    pub symbol: String,
    pub side: Side,
    pub qty: u32,
    pub entry_premium: f64,
    #[serde(default)]
    pub closed: bool,
}

/// A multi-leg option structure held atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredGroup {
    pub transaction_id: String,
    pub underlying: String,
    /// e.g. "long_straddle", "iron_condor".
    pub strategy: String,
    pub legs: Vec<GroupLeg>,
    pub created_at: DateTime<Utc>,
}

impl StructuredGroup {
    pub fn long_leg_symbols(&self) -> impl Iterator<Item = &str> {
        self.legs
            .iter()
            .filter(|l| l.side == Side::Buy)
            .map(|l| l.symbol.as_str())
    }

    pub fn open_short_legs(&self) -> impl Iterator<Item = &GroupLeg> {
        self.legs
            .iter()
            .filter(|l| l.side == Side::Sell && !l.closed)
    }
}
