// =============================================================================
// Vajra Trading Engine — Main Entry Point
// =============================================================================
//
// Paper mode is the default; live trading requires both mode=live in the
// config and broker credentials in the environment. Backtest mode replays
// historical bars through the same signal path and prints a report.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod backtest;
mod config;
mod error;
mod fno;
mod gateway;
mod indicators;
mod market_data;
mod persist;
mod portfolio;
mod regime;
mod scheduler;
mod strategies;
mod telemetry;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::gateway::{BrokerClient, BrokerGateway, CircuitBreaker, HttpBroker, PaperBroker, RateLimiter};
use crate::market_data::fallback::FallbackSource;
use crate::market_data::MarketDataProvider;
use crate::persist::StateManager;
use crate::portfolio::{Portfolio, PortfolioParams};
use crate::scheduler::Scheduler;
use crate::telemetry::TelemetryClient;
use crate::types::TradingMode;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Vajra Trading Engine starting up");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Environment overrides.
    if let Ok(symbols) = std::env::var("VAJRA_SYMBOLS") {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| {
                let ok = types::is_valid_equity_symbol(s);
                if !ok && !s.is_empty() {
                    warn!(symbol = %s, "dropping malformed symbol from VAJRA_SYMBOLS");
                }
                ok
            })
            .collect();
    }
    if let Ok(mode) = std::env::var("VAJRA_MODE") {
        match mode.to_lowercase().as_str() {
            "paper" => config.mode = TradingMode::Paper,
            "live" => config.mode = TradingMode::Live,
            "backtest" => config.mode = TradingMode::Backtest,
            other => warn!(mode = other, "unknown VAJRA_MODE ignored"),
        }
    }
    if let Ok(url) = std::env::var("VAJRA_TELEMETRY_URL") {
        config.telemetry_url = url;
    }

    config.validate().context("invalid engine configuration")?;
    info!(
        mode = %config.mode,
        symbols = config.symbols.len(),
        initial_capital = config.initial_capital,
        "engine config ready"
    );

    // ── 2. Broker client & gateway ───────────────────────────────────────
    let client = match config.mode {
        TradingMode::Live => {
            let base_url = std::env::var("VAJRA_BROKER_URL")
                .context("VAJRA_BROKER_URL required for live mode")?;
            let api_key = std::env::var("VAJRA_API_KEY")
                .context("VAJRA_API_KEY required for live mode")?;
            let secret = std::env::var("VAJRA_API_SECRET")
                .context("VAJRA_API_SECRET required for live mode")?;
            warn!("LIVE TRADING MODE — real orders will be placed");
            BrokerClient::Http(HttpBroker::new(base_url, api_key, secret))
        }
        TradingMode::Paper | TradingMode::Backtest => {
            info!("paper broker active — orders are simulated");
            BrokerClient::Paper(PaperBroker::new())
        }
    };

    let gateway = Arc::new(BrokerGateway::new(
        client,
        RateLimiter::new(config.max_per_second, config.max_per_minute),
        CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_secs(config.circuit_reset_timeout_secs),
        ),
        Duration::from_secs(config.order_status_budget_secs),
    ));

    // ── 3. Market data ───────────────────────────────────────────────────
    let fallback = std::env::var("VAJRA_FALLBACK_URL")
        .ok()
        .filter(|u| !u.is_empty())
        .map(FallbackSource::new);
    let provider = Arc::new(MarketDataProvider::new(
        gateway.clone(),
        fallback,
        Duration::from_secs(config.cache_ttl_secs),
    ));

    if config.mode == TradingMode::Live {
        // Symbol -> token resolution sanity check against the live API.
        match provider.fetch_instruments("NSE").await {
            Ok(list) => info!(count = list.len(), "instrument master loaded"),
            Err(e) => warn!(error = %e, "instrument master unavailable at startup"),
        }
    }

    // ── 4. Backtest fast path ────────────────────────────────────────────
    if config.mode == TradingMode::Backtest {
        info!("backtest mode — fetching history and replaying");
        let mut data = HashMap::new();
        for symbol in &config.symbols {
            match provider.fetch_bars(symbol, "5minute", 90).await {
                Ok(series) => {
                    data.insert(symbol.clone(), series);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "no history for symbol"),
            }
        }
        let report = backtest::run_backtest(&config, data).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // ── 5. Portfolio, persistence, telemetry ─────────────────────────────
    let portfolio = Portfolio::new(
        config.initial_capital,
        PortfolioParams::from_config(&config),
        config.mode,
    );
    let state_manager = StateManager::new(config.state_dir.clone(), config.trades_dir.clone())
        .context("failed to prepare state directories")?;
    let telemetry = TelemetryClient::new(&config.telemetry_url, config.telemetry_queue_capacity);

    // ── 6. Scheduler ─────────────────────────────────────────────────────
    let saved_config = config.clone();
    let mut scheduler = Scheduler::new(
        config,
        provider,
        gateway,
        portfolio,
        state_manager,
        telemetry,
    );
    scheduler.restore(chrono::Utc::now()).await;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    shutdown.notify_one();

    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task join failed");
    }

    if let Err(e) = saved_config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save engine config on shutdown");
    }

    info!("Vajra Trading Engine shut down complete");
    Ok(())
}
