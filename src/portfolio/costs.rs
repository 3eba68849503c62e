// =============================================================================
// Transaction Cost Model — Indian cash and options schedules
// =============================================================================
//
// Equity (delivery/intraday):
//   brokerage           = min(amount * 0.02 %, 20)
//   transaction charges = amount * 0.00325 %
//   GST                 = 18 % of (brokerage + transaction charges)
//   STT                 = amount * 0.1 %, sell side only
//
// Options (premium turnover):
//   brokerage           = flat 20 per executed order
//   transaction charges = amount * 0.05 %
//   GST                 = 18 % of (brokerage + transaction charges)
//   STT                 = amount * 0.0625 %, sell side only
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Which fee schedule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Equity,
    Option,
}

/// Itemised fees for a single executed order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub brokerage: f64,
    pub transaction_charges: f64,
    pub gst: f64,
    pub stt: f64,
}

impl FeeBreakdown {
    pub fn total(&self) -> f64 {
        self.brokerage + self.transaction_charges + self.gst + self.stt
    }
}

const EQUITY_BROKERAGE_RATE: f64 = 0.0002;
const EQUITY_BROKERAGE_CAP: f64 = 20.0;
const EQUITY_TXN_RATE: f64 = 3.25e-5;
const EQUITY_STT_RATE: f64 = 0.001;

const OPTION_BROKERAGE_FLAT: f64 = 20.0;
const OPTION_TXN_RATE: f64 = 5.0e-4;
const OPTION_STT_RATE: f64 = 6.25e-4;

const GST_RATE: f64 = 0.18;

/// Compute fees for an order of `amount` (quantity x price) on `side`.
///
/// Negative or non-finite amounts are treated as zero turnover.
pub fn compute_fees(kind: InstrumentKind, amount: f64, side: Side) -> FeeBreakdown {
    let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };

    let (brokerage, transaction_charges, stt_rate) = match kind {
        InstrumentKind::Equity => (
            (amount * EQUITY_BROKERAGE_RATE).min(EQUITY_BROKERAGE_CAP),
            amount * EQUITY_TXN_RATE,
            EQUITY_STT_RATE,
        ),
        InstrumentKind::Option => (
            if amount > 0.0 { OPTION_BROKERAGE_FLAT } else { 0.0 },
            amount * OPTION_TXN_RATE,
            OPTION_STT_RATE,
        ),
    };

    let gst = (brokerage + transaction_charges) * GST_RATE;
    let stt = match side {
        Side::Sell => amount * stt_rate,
        Side::Buy => 0.0,
    };

    FeeBreakdown {
        brokerage,
        transaction_charges,
        gst,
        stt,
    }
}
