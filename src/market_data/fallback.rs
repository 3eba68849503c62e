// =============================================================================
// Fallback Market-Data Source
// =============================================================================
//
// Secondary bar source engaged only when the primary (broker) historical API
// returns nothing or exhausts its retry budget. Tickers are mapped from the
// domestic symbol form deterministically: `RELIANCE` -> `RELIANCE.NS`
// (`.BO` for the handful of BSE-only names).

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::market_data::Bar;

/// Symbols that resolve on the BSE feed rather than the NSE feed.
const BSE_ONLY: &[&str] = &["SENSEX", "BANKEX"];

/// Deterministic domestic-symbol -> fallback-ticker mapping.
pub fn map_ticker(symbol: &str) -> String {
    if BSE_ONLY.contains(&symbol) {
        format!("{symbol}.BO")
    } else {
        format!("{symbol}.NS")
    }
}

/// HTTP client for the secondary bar source.
pub struct FallbackSource {
    base_url: String,
    client: reqwest::Client,
}

impl FallbackSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Fetch bars for `symbol` over the lookback window.
    ///
    /// Response shape: `{"bars": [{"t": epoch_secs, "o":..,"h":..,"l":..,
    /// "c":..,"v":..}, ...]}`, sorted ascending.
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        lookback_days: u32,
    ) -> Result<Vec<Bar>> {
        let ticker = map_ticker(symbol);
        let url = format!(
            "{}/v1/bars?ticker={}&interval={}&lookback_days={}",
            self.base_url, ticker, interval, lookback_days
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("fallback bars request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse fallback bars response")?;

        if !status.is_success() {
            anyhow::bail!("fallback source returned {status}: {body}");
        }

        let raw = body["bars"].as_array().cloned().unwrap_or_default();
        let mut bars = Vec::with_capacity(raw.len());
        for entry in &raw {
            let bar = Bar {
                timestamp: entry["t"].as_i64().unwrap_or(0),
                open: entry["o"].as_f64().unwrap_or(f64::NAN),
                high: entry["h"].as_f64().unwrap_or(f64::NAN),
                low: entry["l"].as_f64().unwrap_or(f64::NAN),
                close: entry["c"].as_f64().unwrap_or(f64::NAN),
                volume: entry["v"].as_f64().unwrap_or(0.0),
            };
            if !bar.is_valid() {
                warn!(symbol, ?entry, "fallback bar failed validation — dropped");
                continue;
            }
            bars.push(bar);
        }

        debug!(symbol, ticker, count = bars.len(), "fallback bars fetched");
        Ok(bars)
    }
}

impl std::fmt::Debug for FallbackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSource")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nse_symbols_map_to_ns_suffix() {
        assert_eq!(map_ticker("RELIANCE"), "RELIANCE.NS");
        assert_eq!(map_ticker("NIFTY"), "NIFTY.NS");
    }

    #[test]
    fn bse_only_symbols_map_to_bo_suffix() {
        assert_eq!(map_ticker("SENSEX"), "SENSEX.BO");
        assert_eq!(map_ticker("BANKEX"), "BANKEX.BO");
    }

    #[test]
    fn mapping_is_deterministic() {
        assert_eq!(map_ticker("TCS"), map_ticker("TCS"));
    }
}
