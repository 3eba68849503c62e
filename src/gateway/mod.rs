// =============================================================================
// Broker Gateway — every broker call wrapped in rate limiter, retry, and
// circuit breaker
// =============================================================================
//
// Call pipeline per attempt:
//
//   limiter.acquire() -> breaker.check() -> client call
//                        |                   |- Ok  -> breaker.record_success()
//                        |                   |- Err -> breaker.record_failure(),
//                        |                            retry with backoff
//                        |- open -> fail fast, no external call
//
// Retry backoff: 0.5, 1, 2, 4, 8 seconds, max 5 attempts.
//
// Order placement additionally polls order status with the same backoff
// sequence until the order reaches a terminal state or the wall-time budget
// (default 30 s) expires. Partial fills below 90 % have their remainder
// cancelled here; the caller sees the filled quantity and decides what to
// record.
// =============================================================================

pub mod circuit;
pub mod client;
pub mod paper;
pub mod rate_limit;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::OrderError;
use crate::types::Side;

pub use circuit::{CircuitBreaker, CircuitState};
pub use client::{BrokerClient, HttpBroker};
pub use paper::PaperBroker;
pub use rate_limit::RateLimiter;

// ---------------------------------------------------------------------------
// Order types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

/// Broker product type: delivery, intraday, or carry-forward derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Cnc,
    Mis,
    Nrml,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cnc => "CNC",
            Self::Mis => "MIS",
            Self::Nrml => "NRML",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub qty: u32,
    pub side: Side,
    pub price: Option<f64>,
    pub order_type: OrderType,
    pub product: ProductType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Complete,
    Partial,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub filled_qty: u32,
    pub avg_price: f64,
    pub rejection_reason: Option<String>,
}

/// Final outcome of a confirmed order, as seen by the caller.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    pub requested_qty: u32,
    pub filled_qty: u32,
    pub avg_price: f64,
    pub status: OrderStatus,
}

impl OrderFill {
    /// Fraction of the requested quantity that was filled.
    pub fn fill_ratio(&self) -> f64 {
        if self.requested_qty == 0 {
            return 0.0;
        }
        self.filled_qty as f64 / self.requested_qty as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub token: String,
    pub trading_symbol: String,
    pub exchange: String,
    pub lot_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: i64,
    pub avg_price: f64,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Retry backoff schedule shared by calls and order-status polling.
const BACKOFF_SECS: [f64; 5] = [0.5, 1.0, 2.0, 4.0, 8.0];

/// Fill ratio below which the gateway cancels the remainder.
pub const PARTIAL_FILL_FLOOR: f64 = 0.9;

pub struct BrokerGateway {
    client: BrokerClient,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    order_status_budget: Duration,
}

impl BrokerGateway {
    pub fn new(
        client: BrokerClient,
        limiter: RateLimiter,
        breaker: CircuitBreaker,
        order_status_budget: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            breaker,
            order_status_budget,
        }
    }

    /// Direct access for callers that need the raw client (startup
    /// reconciliation seeds the paper price book through this).
    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    // -------------------------------------------------------------------------
    // Core guarded-call plumbing
    // -------------------------------------------------------------------------

    /// Run one client call through limiter + breaker + retry.
    async fn guarded<T, Fut, F>(&self, op_name: &str, mut op: F) -> Result<T, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();

        for (attempt, backoff) in BACKOFF_SECS.iter().enumerate() {
            self.limiter.acquire().await;
            self.breaker.check()?;

            match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    last_error = format!("{e:#}");
                    warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        error = %last_error,
                        "broker call failed"
                    );
                    // Do not sleep after the final attempt.
                    if attempt + 1 < BACKOFF_SECS.len() {
                        tokio::time::sleep(Duration::from_secs_f64(*backoff)).await;
                    }
                }
            }
        }

        Err(OrderError::Transport(format!(
            "{op_name} failed after {} attempts: {last_error}",
            BACKOFF_SECS.len()
        )))
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Place an order and poll until it resolves.
    ///
    /// Outcomes:
    /// - `Complete` — full fill.
    /// - `Partial`  — the broker filled some quantity; below the 90 % floor
    ///   the remainder has already been cancelled. The caller applies the
    ///   accept/discard policy.
    /// - `Err(Rejected)` — broker rejected the order; nothing filled.
    /// - `Err(Timeout)`  — nothing filled within the budget; order cancelled.
    pub async fn place_and_confirm(
        &self,
        request: &OrderRequest,
    ) -> Result<OrderFill, OrderError> {
        let client = &self.client;
        let order_id = self
            .guarded("place_order", || {
                let req = request.clone();
                async move { client.place_order(&req).await }
            })
            .await?;

        let deadline = tokio::time::Instant::now() + self.order_status_budget;
        let mut last_report: Option<OrderStatusReport> = None;
        let mut backoff_idx = 0usize;

        loop {
            let id = order_id.clone();
            let report = self
                .guarded("order_status", || {
                    let id = id.clone();
                    async move { client.order_status(&id).await }
                })
                .await?;

            if report.status.is_terminal() {
                last_report = Some(report);
                break;
            }
            last_report = Some(report);

            let delay = Duration::from_secs_f64(BACKOFF_SECS[backoff_idx.min(BACKOFF_SECS.len() - 1)]);
            backoff_idx += 1;

            if tokio::time::Instant::now() + delay >= deadline {
                debug!(order_id = %order_id, "order-status budget exhausted");
                break;
            }
            tokio::time::sleep(delay).await;
        }

        let report = last_report.expect("at least one status poll ran");

        match report.status {
            OrderStatus::Complete => Ok(OrderFill {
                order_id,
                requested_qty: request.qty,
                filled_qty: report.filled_qty,
                avg_price: report.avg_price,
                status: OrderStatus::Complete,
            }),
            OrderStatus::Rejected => Err(OrderError::Rejected(
                report
                    .rejection_reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            )),
            OrderStatus::Cancelled => {
                if report.filled_qty > 0 {
                    Ok(OrderFill {
                        order_id,
                        requested_qty: request.qty,
                        filled_qty: report.filled_qty,
                        avg_price: report.avg_price,
                        status: OrderStatus::Partial,
                    })
                } else {
                    Err(OrderError::Rejected("order cancelled unfilled".to_string()))
                }
            }
            OrderStatus::Partial | OrderStatus::Pending => {
                let filled = report.filled_qty;
                let ratio = filled as f64 / request.qty.max(1) as f64;

                if ratio < PARTIAL_FILL_FLOOR {
                    // Cancel the remainder before reporting back.
                    let id = order_id.clone();
                    if let Err(e) = self
                        .guarded("cancel_order", || {
                            let id = id.clone();
                            async move { client.cancel_order(&id).await }
                        })
                        .await
                    {
                        warn!(order_id = %order_id, error = %e, "failed to cancel partial remainder");
                    }
                }

                if filled == 0 {
                    return Err(OrderError::Timeout {
                        budget_secs: self.order_status_budget.as_secs(),
                    });
                }

                info!(
                    order_id = %order_id,
                    filled,
                    requested = request.qty,
                    ratio = format!("{ratio:.2}"),
                    "partial fill reconciled"
                );

                Ok(OrderFill {
                    order_id,
                    requested_qty: request.qty,
                    filled_qty: filled,
                    avg_price: report.avg_price,
                    status: OrderStatus::Partial,
                })
            }
        }
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<(), OrderError> {
        let client = &self.client;
        self.guarded("cancel_order", || async move {
            client.cancel_order(order_id).await
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------

    pub async fn historical_bars(
        &self,
        symbol: &str,
        interval: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<crate::market_data::Bar>, OrderError> {
        let client = &self.client;
        self.guarded("historical_bars", || async move {
            client
                .historical_bars(symbol, interval, from_ts, to_ts)
                .await
        })
        .await
    }

    /// Quote for an equity or option symbol. Options are resolved by
    /// searching the NFO and BFO segments after the cash market.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, OrderError> {
        let client = &self.client;
        self.guarded("get_quote", || async move {
            client.get_quote(symbol, &["NSE", "NFO", "BFO"]).await
        })
        .await
    }

    pub async fn positions(&self) -> Result<Vec<BrokerPosition>, OrderError> {
        let client = &self.client;
        self.guarded("positions", || async move { client.positions().await })
            .await
    }

    pub async fn instruments(&self, exchange: &str) -> Result<Vec<Instrument>, OrderError> {
        let client = &self.client;
        self.guarded("instruments", || async move {
            client.instruments(exchange).await
        })
        .await
    }
}

impl std::fmt::Debug for BrokerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerGateway")
            .field("client", &self.client)
            .field("limiter", &self.limiter)
            .field("breaker", &self.breaker)
            .field("order_status_budget", &self.order_status_budget)
            .finish()
    }
}
