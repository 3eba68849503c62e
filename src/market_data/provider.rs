// =============================================================================
// Market-Data Provider — TTL-cached bar fetch with bounded-concurrency batches
// =============================================================================
//
// Every fetch goes through the broker gateway (rate limiter + breaker +
// retry). Results are cached per `(symbol, interval, lookback_days)` with a
// TTL; while the circuit is open a cache entry up to 2x TTL old is still
// served rather than failing the symbol.
//
// The fallback source is engaged only when the primary returns no data or
// fails after its retry budget.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{DataError, OrderError};
use crate::gateway::{BrokerGateway, Instrument};
use crate::market_data::fallback::FallbackSource;
use crate::market_data::{BarSeries, BarsKey};

struct CacheEntry {
    series: BarSeries,
    inserted_at: Instant,
}

pub struct MarketDataProvider {
    gateway: Arc<BrokerGateway>,
    fallback: Option<FallbackSource>,
    cache: RwLock<HashMap<BarsKey, CacheEntry>>,
    ttl: Duration,
}

impl MarketDataProvider {
    pub fn new(gateway: Arc<BrokerGateway>, fallback: Option<FallbackSource>, ttl: Duration) -> Self {
        Self {
            gateway,
            fallback,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch a validated bar series for one symbol.
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        lookback_days: u32,
    ) -> Result<BarSeries, DataError> {
        let key = BarsKey {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            lookback_days,
        };

        if let Some(series) = self.cached_within(&key, self.ttl) {
            debug!(%key, "cache hit");
            return Ok(series);
        }

        let to_ts = Utc::now().timestamp();
        let from_ts = to_ts - i64::from(lookback_days) * 86_400;

        match self
            .gateway
            .historical_bars(symbol, interval, from_ts, to_ts)
            .await
        {
            Ok(bars) if !bars.is_empty() => {
                let series = BarSeries::from_bars(symbol, bars)?;
                self.insert_cache(key, series.clone());
                Ok(series)
            }
            Ok(_) => {
                debug!(symbol, "primary returned no bars — trying fallback");
                self.fetch_via_fallback(&key, symbol, interval, lookback_days)
                    .await
            }
            Err(OrderError::CircuitOpen(_)) => {
                // Serve stale cache while the breaker cools down.
                if let Some(series) = self.cached_within(&key, self.ttl * 2) {
                    warn!(%key, "circuit open — serving stale cache");
                    return Ok(series);
                }
                Err(DataError::Stale {
                    symbol: symbol.to_string(),
                })
            }
            Err(e) => {
                warn!(symbol, error = %e, "primary bar fetch failed — trying fallback");
                self.fetch_via_fallback(&key, symbol, interval, lookback_days)
                    .await
            }
        }
    }

    /// Fetch several symbols with bounded concurrency.
    ///
    /// Symbols are processed in batches of `batch_size` concurrent fetches
    /// with `inter_batch_delay` between batches. Failed symbols are dropped
    /// from the result map (logged, never fatal).
    pub async fn fetch_bars_batch(
        &self,
        symbols: &[String],
        interval: &str,
        lookback_days: u32,
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> HashMap<String, BarSeries> {
        let mut out = HashMap::with_capacity(symbols.len());
        let batch_size = batch_size.max(1);

        for (i, chunk) in symbols.chunks(batch_size).enumerate() {
            if i > 0 && !inter_batch_delay.is_zero() {
                tokio::time::sleep(inter_batch_delay).await;
            }

            let results: Vec<(String, Result<BarSeries, DataError>)> = stream::iter(chunk.to_vec())
                .map(|symbol| async move {
                    let result = self.fetch_bars(&symbol, interval, lookback_days).await;
                    (symbol, result)
                })
                .buffer_unordered(batch_size)
                .collect()
                .await;

            for (symbol, result) in results {
                match result {
                    Ok(series) => {
                        out.insert(symbol, series);
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "symbol skipped this scan");
                    }
                }
            }
        }

        out
    }

    /// Last-traded prices for a set of symbols (equities or option trading
    /// symbols; the gateway searches NFO/BFO after the cash market).
    pub async fn fetch_current_prices(&self, symbols: &[String]) -> HashMap<String, f64> {
        let results: Vec<(String, Option<f64>)> = stream::iter(symbols)
            .map(|symbol| async move {
                match self.gateway.get_quote(symbol).await {
                    Ok(quote) => (symbol.clone(), Some(quote.last)),
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "quote fetch failed");
                        (symbol.clone(), None)
                    }
                }
            })
            .buffer_unordered(4)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(s, p)| p.map(|p| (s, p)))
            .collect()
    }

    pub async fn fetch_instruments(&self, exchange: &str) -> Result<Vec<Instrument>, DataError> {
        self.gateway
            .instruments(exchange)
            .await
            .map_err(|e| DataError::Malformed {
                symbol: exchange.to_string(),
                detail: format!("instrument list fetch failed: {e}"),
            })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn fetch_via_fallback(
        &self,
        key: &BarsKey,
        symbol: &str,
        interval: &str,
        lookback_days: u32,
    ) -> Result<BarSeries, DataError> {
        let fallback = self.fallback.as_ref().ok_or_else(|| DataError::Missing {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            lookback_days,
        })?;

        match fallback.fetch_bars(symbol, interval, lookback_days).await {
            Ok(bars) if !bars.is_empty() => {
                let series = BarSeries::from_bars(symbol, bars)?;
                self.insert_cache(key.clone(), series.clone());
                Ok(series)
            }
            Ok(_) => Err(DataError::Missing {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                lookback_days,
            }),
            Err(e) => {
                warn!(symbol, error = %e, "fallback fetch failed");
                Err(DataError::Missing {
                    symbol: symbol.to_string(),
                    interval: interval.to_string(),
                    lookback_days,
                })
            }
        }
    }

    fn cached_within(&self, key: &BarsKey, max_age: Duration) -> Option<BarSeries> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        (entry.inserted_at.elapsed() <= max_age).then(|| entry.series.clone())
    }

    fn insert_cache(&self, key: BarsKey, series: BarSeries) {
        self.cache.write().insert(
            key,
            CacheEntry {
                series,
                inserted_at: Instant::now(),
            },
        );
    }
}

impl std::fmt::Debug for MarketDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataProvider")
            .field("cached_keys", &self.cache.read().len())
            .field("ttl", &self.ttl)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
