// =============================================================================
// Broker Client — authenticated HTTP handle and the paper simulator behind
// one dispatch surface
// =============================================================================
//
// The engine consumes an already-authenticated handle; token acquisition is
// someone else's problem. Signed requests carry an HMAC-SHA256 checksum of
// the query in the `X-API-CHECKSUM` header.
//
// SECURITY: the secret is never logged or serialized; `Debug` redacts it.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::gateway::paper::PaperBroker;
use crate::gateway::{
    BrokerPosition, Instrument, OrderRequest, OrderStatus, OrderStatusReport, Quote,
};
use crate::market_data::Bar;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Dispatch enum
// ---------------------------------------------------------------------------

/// Paper and live brokers behind one call surface, so the gateway, the
/// scheduler, and the backtest replay all run the same execution path.
pub enum BrokerClient {
    Paper(PaperBroker),
    Http(HttpBroker),
}

impl BrokerClient {
    pub async fn place_order(&self, request: &OrderRequest) -> Result<String> {
        match self {
            Self::Paper(p) => p.place_order(request),
            Self::Http(h) => h.place_order(request).await,
        }
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport> {
        match self {
            Self::Paper(p) => p.order_status(order_id),
            Self::Http(h) => h.order_status(order_id).await,
        }
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        match self {
            Self::Paper(p) => p.cancel_order(order_id),
            Self::Http(h) => h.cancel_order(order_id).await,
        }
    }

    pub async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        match self {
            Self::Paper(p) => Ok(p.positions()),
            Self::Http(h) => h.positions().await,
        }
    }

    /// Quote lookup. `exchanges` are tried in order; derivatives symbols are
    /// found by searching NFO and then BFO.
    pub async fn get_quote(&self, symbol: &str, exchanges: &[&str]) -> Result<Quote> {
        match self {
            Self::Paper(p) => p.get_quote(symbol),
            Self::Http(h) => {
                let mut last_err = None;
                for exchange in exchanges {
                    match h.get_quote(exchange, symbol).await {
                        Ok(q) => return Ok(q),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err
                    .unwrap_or_else(|| anyhow::anyhow!("no exchanges supplied for {symbol}")))
            }
        }
    }

    pub async fn historical_bars(
        &self,
        symbol: &str,
        interval: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Bar>> {
        match self {
            Self::Paper(p) => p.historical_bars(symbol, interval),
            Self::Http(h) => h.historical_bars(symbol, interval, from_ts, to_ts).await,
        }
    }

    pub async fn instruments(&self, exchange: &str) -> Result<Vec<Instrument>> {
        match self {
            Self::Paper(p) => Ok(p.instruments(exchange)),
            Self::Http(h) => h.instruments(exchange).await,
        }
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper(p) => write!(f, "BrokerClient::Paper({p:?})"),
            Self::Http(h) => write!(f, "BrokerClient::Http({h:?})"),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP broker
// ---------------------------------------------------------------------------

/// REST client for the live broker API with HMAC-SHA256 request checksums.
pub struct HttpBroker {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpBroker {
    /// Build from an already-acquired key/token pair.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: base_url.into(),
            client,
        }
    }

    /// HMAC-SHA256 hex checksum of `payload`.
    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn checksum_header(&self, payload: &str) -> (&'static str, String) {
        ("X-API-CHECKSUM", self.sign(payload))
    }

    async fn parse_response(resp: reqwest::Response, what: &str) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))?;
        if !status.is_success() {
            anyhow::bail!("broker {what} returned {status}: {body}");
        }
        Ok(body)
    }

    #[instrument(skip(self, request), name = "broker::place_order")]
    pub async fn place_order(&self, request: &OrderRequest) -> Result<String> {
        let body = serde_json::json!({
            "symbol": request.symbol,
            "exchange": request.exchange,
            "side": request.side.to_string(),
            "quantity": request.qty,
            "price": request.price,
            "order_type": request.order_type.as_str(),
            "product": request.product.as_str(),
        });
        let payload = body.to_string();
        let (header, checksum) = self.checksum_header(&payload);

        let url = format!("{}/orders", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(header, checksum)
            .json(&body)
            .send()
            .await
            .context("POST /orders request failed")?;

        let body = Self::parse_response(resp, "place_order").await?;
        let order_id = body["order_id"]
            .as_str()
            .context("place_order response missing order_id")?
            .to_string();

        debug!(order_id = %order_id, symbol = %request.symbol, "order placed");
        Ok(order_id)
    }

    #[instrument(skip(self), name = "broker::order_status")]
    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /orders/{id} request failed")?;
        let body = Self::parse_response(resp, "order_status").await?;

        let status = match body["status"].as_str().unwrap_or("") {
            "complete" => OrderStatus::Complete,
            "partial" => OrderStatus::Partial,
            "rejected" => OrderStatus::Rejected,
            "cancelled" => OrderStatus::Cancelled,
            other => {
                if !other.is_empty() && other != "pending" && other != "open" {
                    warn!(order_id, status = other, "unrecognised order status — treating as pending");
                }
                OrderStatus::Pending
            }
        };

        Ok(OrderStatusReport {
            status,
            filled_qty: body["filled_quantity"].as_u64().unwrap_or(0) as u32,
            avg_price: body["average_price"].as_f64().unwrap_or(0.0),
            rejection_reason: body["rejection_reason"].as_str().map(str::to_string),
        })
    }

    #[instrument(skip(self), name = "broker::cancel_order")]
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /orders/{id} request failed")?;
        Self::parse_response(resp, "cancel_order").await?;
        debug!(order_id, "order cancelled");
        Ok(())
    }

    #[instrument(skip(self), name = "broker::positions")]
    pub async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let url = format!("{}/portfolio/positions", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /portfolio/positions request failed")?;
        let body = Self::parse_response(resp, "positions").await?;

        let raw = body["positions"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let positions = raw
            .iter()
            .filter_map(|p| {
                Some(BrokerPosition {
                    symbol: p["symbol"].as_str()?.to_string(),
                    qty: p["quantity"].as_i64()?,
                    avg_price: p["average_price"].as_f64().unwrap_or(0.0),
                })
            })
            .collect();

        Ok(positions)
    }

    #[instrument(skip(self), name = "broker::get_quote")]
    pub async fn get_quote(&self, exchange: &str, symbol: &str) -> Result<Quote> {
        let url = format!(
            "{}/quote?exchange={}&symbol={}",
            self.base_url, exchange, symbol
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /quote request failed")?;
        let body = Self::parse_response(resp, "get_quote").await?;

        let last = body["last_price"]
            .as_f64()
            .context("quote response missing last_price")?;
        Ok(Quote {
            last,
            bid: body["bid"].as_f64().unwrap_or(last),
            ask: body["ask"].as_f64().unwrap_or(last),
        })
    }

    /// GET /historical — bars sorted ascending, epoch-second timestamps.
    #[instrument(skip(self), name = "broker::historical_bars")]
    pub async fn historical_bars(
        &self,
        symbol: &str,
        interval: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/historical?symbol={}&interval={}&from={}&to={}",
            self.base_url, symbol, interval, from_ts, to_ts
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /historical request failed")?;
        let body = Self::parse_response(resp, "historical_bars").await?;

        let raw = body["candles"].as_array().cloned().unwrap_or_default();
        let mut bars = Vec::with_capacity(raw.len());

        for entry in &raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!(symbol, "skipping malformed candle entry");
                    continue;
                }
            };
            bars.push(Bar {
                timestamp: arr[0].as_i64().unwrap_or(0),
                open: Self::parse_f64(&arr[1])?,
                high: Self::parse_f64(&arr[2])?,
                low: Self::parse_f64(&arr[3])?,
                close: Self::parse_f64(&arr[4])?,
                volume: Self::parse_f64(&arr[5])?,
            });
        }

        debug!(symbol, interval, count = bars.len(), "historical bars fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "broker::instruments")]
    pub async fn instruments(&self, exchange: &str) -> Result<Vec<Instrument>> {
        let url = format!("{}/instruments?exchange={}", self.base_url, exchange);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /instruments request failed")?;
        let body = Self::parse_response(resp, "instruments").await?;

        let raw = body["instruments"].as_array().cloned().unwrap_or_default();
        let instruments = raw
            .iter()
            .filter_map(|i| {
                Some(Instrument {
                    token: i["token"].as_str()?.to_string(),
                    trading_symbol: i["trading_symbol"].as_str()?.to_string(),
                    exchange: exchange.to_string(),
                    lot_size: i["lot_size"].as_u64().unwrap_or(1) as u32,
                })
            })
            .collect();
        Ok(instruments)
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(n) = val.as_f64() {
            Ok(n)
        } else if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for HttpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBroker")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
