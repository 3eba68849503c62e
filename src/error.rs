// =============================================================================
// Error taxonomy for the Vajra trading engine
// =============================================================================
//
// Every fallible component surface returns one of these typed errors so the
// scheduler can decide recovery per kind:
//
//   DataError        — skip the symbol this iteration, no state change
//   RateLimitError   — wait per the limiter's hint, retry within budget
//   CircuitOpenError — fail fast, serve cache if fresh enough, else skip
//   ExecutionError   — abort the entry, no state change
//   OrderError       — cancel residual, record nothing unless >= 90 % filled
//   RiskError        — abort, log, continue the loop
//   PersistenceError — log, try backup path; memory stays authoritative
//
// Transport-level trouble (HTTP, JSON) stays inside the gateway as `anyhow`
// context and is categorised into one of the kinds above before it crosses a
// component boundary.
// =============================================================================

use thiserror::Error;

/// Market-data failures. Recovery: skip the symbol for this iteration.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data returned for {symbol} ({interval}, {lookback_days}d)")]
    Missing {
        symbol: String,
        interval: String,
        lookback_days: u32,
    },

    #[error("malformed bars for {symbol}: {detail}")]
    Malformed { symbol: String, detail: String },

    #[error("cached data for {symbol} is stale and the circuit is open")]
    Stale { symbol: String },
}

/// The circuit breaker is open; no external call was attempted.
#[derive(Debug, Error)]
#[error("circuit open — retry after {retry_after_secs:.1}s")]
pub struct CircuitOpenError {
    pub retry_after_secs: f64,
}

/// Entry-side validation failures. No state is changed on any of these.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("insufficient cash: need {required:.2}, have {available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("sized quantity rounds to zero (lot size {lot_size})")]
    InsufficientSize { lot_size: u32 },

    #[error("position value {value:.2} exceeds cap {cap:.2}")]
    PositionCap { value: f64, cap: f64 },

    #[error("invalid premium for {symbol}: computed max loss {max_loss:.2}")]
    InvalidPremium { symbol: String, max_loss: f64 },

    #[error("invalid order inputs: {0}")]
    BadInput(String),

    #[error("no position in {0}")]
    NoPosition(String),

    #[error("minimum holding period not met for {symbol} ({held_secs}s held)")]
    HoldingPeriod { symbol: String, held_secs: i64 },

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Broker order failures surfaced by the gateway after retry/cancel policy.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("partial fill below threshold: {filled}/{requested}")]
    PartialShortfall { filled: u32, requested: u32 },

    #[error("order status polling timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("broker transport failure: {0}")]
    Transport(String),
}

/// F&O composer risk blocks. Recovery: log and continue the scan. The
/// display forms double as the reason strings in scan logs.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("already_engaged({0})")]
    AlreadyEngaged(String),

    #[error("correlation_block({candidate},{held},{rho:.2})")]
    CorrelationBlock {
        candidate: String,
        held: String,
        rho: f64,
    },

    #[error("exposure_exceeded({detail})")]
    ExposureExceeded { detail: String },
}

/// Snapshot/archive write failures. Memory remains authoritative.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("write to {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read from {path} failed: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialisation failed: {0}")]
    Encode(#[from] serde_json::Error),
}
