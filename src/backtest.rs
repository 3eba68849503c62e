// =============================================================================
// Backtest — deterministic bar replay through the live signal path
// =============================================================================
//
// Replays historical bars through the same strategy -> aggregate -> plan ->
// fill pipeline the scheduler drives, against the paper broker. "Now" is the
// replayed bar's timestamp, fills land at the bar close, and no wall-clock,
// randomness, or persistence is involved, so identical input produces an
// identical report.
//
// Per step, in scheduler order: exits first (signal exits at the exit
// thresholds, then stop/target/trailing), then confidence-sorted entries.
// Whatever remains open at the end of the data is closed at the final bar.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{aggregate, AggregatedSignal, AggregationThresholds};
use crate::config::EngineConfig;
use crate::gateway::{
    BrokerClient, BrokerGateway, CircuitBreaker, OrderRequest, OrderType, PaperBroker, ProductType,
    RateLimiter,
};
use crate::indicators::atr::calculate as calculate_atr14;
use crate::market_data::{Bar, BarSeries};
use crate::portfolio::{
    EntryRequest, ExitReason, InstrumentKind, Portfolio, PortfolioCounters, PortfolioParams, Trade,
};
use crate::strategies::Strategy;
use crate::types::{Action, Side, TradingMode};

/// Bars consumed before the first evaluation step.
const WARMUP_BARS: usize = 60;

/// Outcome of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbols: usize,
    pub steps: usize,
    pub trades: Vec<Trade>,
    pub counters: PortfolioCounters,
    pub initial_cash: f64,
    pub final_cash: f64,
    pub final_value: f64,
    pub return_pct: f64,
}

/// Replay `data` (per-symbol bar series, aligned oldest-first) under the
/// given configuration.
pub async fn run_backtest(
    config: &EngineConfig,
    data: HashMap<String, BarSeries>,
) -> BacktestReport {
    let gateway = BrokerGateway::new(
        BrokerClient::Paper(PaperBroker::new()),
        RateLimiter::new(1_000, 60_000),
        CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_secs(config.circuit_reset_timeout_secs),
        ),
        Duration::from_secs(config.order_status_budget_secs),
    );
    let gateway = Arc::new(gateway);

    let portfolio = Portfolio::new(
        config.initial_capital,
        PortfolioParams::from_config(config),
        TradingMode::Backtest,
    );
    let strategies = Strategy::default_set();

    let entry_thresholds = AggregationThresholds {
        agreement: config.agreement_threshold_entry,
        min_confidence: config.min_confidence_entry,
    };
    let exit_thresholds = AggregationThresholds {
        agreement: config.agreement_threshold_exit,
        min_confidence: config.min_confidence_exit,
    };

    let max_len = data.values().map(BarSeries::len).max().unwrap_or(0);
    // Deterministic symbol order.
    let mut symbols: Vec<&String> = data.keys().collect();
    symbols.sort();

    let mut steps = 0usize;
    let mut all_trades: Vec<Trade> = Vec::new();
    let mut last_prices: HashMap<String, f64> = HashMap::new();
    let mut last_now = Utc::now();

    for t in WARMUP_BARS..max_len {
        steps += 1;

        // Evaluate every symbol on its window ending at bar t.
        let mut signals: HashMap<String, AggregatedSignal> = HashMap::new();
        for symbol in &symbols {
            let series = &data[*symbol];
            if series.len() <= t {
                continue;
            }
            let window = BarSeries::from_bars((*symbol).as_str(), series.bars()[..=t].to_vec())
                .expect("window of a validated series is valid");

            let bar = window.bars()[window.len() - 1];
            last_prices.insert((*symbol).clone(), bar.close);
            last_now = bar_time(&bar);

            let held = portfolio.has_position(symbol);
            let thresholds = if held { &exit_thresholds } else { &entry_thresholds };
            let outputs: Vec<_> = strategies
                .iter()
                .map(|s| s.evaluate(&window, symbol))
                .collect();
            let atr = calculate_atr14(window.bars());
            let signal = aggregate(&outputs, symbol, thresholds, atr, window.last_close());
            signals.insert((*symbol).clone(), signal);
        }
        let now = last_now;

        // --- Exits first ---------------------------------------------------
        for position in portfolio.positions() {
            let Some(signal) = signals.get(&position.symbol) else {
                continue;
            };
            if signal.action == Action::Sell {
                let price = signal.last_close.unwrap_or(position.entry_price);
                if let Some(trade) = sell(
                    &portfolio,
                    &gateway,
                    &position.symbol,
                    position.shares,
                    price,
                    ExitReason::Signal,
                    now,
                )
                .await
                {
                    all_trades.push(trade);
                }
            }
        }

        for intent in portfolio.update_risk_exits(&last_prices) {
            if let Some(trade) = sell(
                &portfolio,
                &gateway,
                &intent.symbol,
                intent.shares,
                intent.ref_price,
                intent.reason,
                now,
            )
            .await
            {
                all_trades.push(trade);
            }
        }

        // --- Entries -------------------------------------------------------
        let mut candidates: Vec<&AggregatedSignal> = signals
            .values()
            .filter(|s| s.action == Action::Buy)
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        for signal in candidates {
            if portfolio.position_count() >= config.max_positions {
                break;
            }
            if signal.confidence < config.min_confidence_entry
                || portfolio.has_position(&signal.symbol)
                || portfolio.cooldown_active(&signal.symbol, now)
            {
                continue;
            }
            let Some(price) = signal.last_close.filter(|p| *p > 0.0) else {
                continue;
            };
            let requested = ((portfolio.cash() * 0.10) / price).floor() as u32;
            if requested == 0 {
                continue;
            }

            let request = EntryRequest {
                symbol: signal.symbol.clone(),
                requested_shares: requested,
                price_hint: price,
                confidence: signal.confidence,
                sector: config.sector(&signal.symbol),
                atr: signal.atr,
                lot_size: None,
                kind: InstrumentKind::Equity,
                product: ProductType::Mis,
                transaction_id: None,
            };

            let plan = match portfolio.plan_buy(&request, now) {
                Ok(plan) => plan,
                Err(_) => continue,
            };
            let order = OrderRequest {
                symbol: plan.symbol.clone(),
                exchange: "NSE".to_string(),
                qty: plan.shares,
                side: Side::Buy,
                price: Some(plan.price_hint),
                order_type: OrderType::Limit,
                product: plan.product,
            };
            let Ok(fill) = gateway.place_and_confirm(&order).await else {
                continue;
            };
            match portfolio.apply_buy_fill(&plan, fill.filled_qty, fill.avg_price, now) {
                Ok(trade) => all_trades.push(trade),
                Err(e) => warn!(symbol = %plan.symbol, error = %e, "backtest entry failed"),
            }
        }
    }

    // Close whatever is still open at the final bar.
    let now = last_now;
    for position in portfolio.positions() {
        let price = last_prices
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price);
        if let Some(trade) = sell(
            &portfolio,
            &gateway,
            &position.symbol,
            position.shares,
            price,
            ExitReason::DayEndClose,
            now,
        )
        .await
        {
            all_trades.push(trade);
        }
    }

    let counters = portfolio.counters();
    let final_cash = portfolio.cash();
    let final_value = portfolio.mark_to_market(&last_prices);
    let return_pct = if config.initial_capital > 0.0 {
        (final_value - config.initial_capital) / config.initial_capital * 100.0
    } else {
        0.0
    };

    info!(
        steps,
        trades = all_trades.len(),
        total_pnl = counters.total_pnl,
        return_pct = format!("{return_pct:.2}"),
        "backtest complete"
    );

    BacktestReport {
        symbols: data.len(),
        steps,
        trades: all_trades,
        counters,
        initial_cash: config.initial_capital,
        final_cash,
        final_value,
        return_pct,
    }
}

async fn sell(
    portfolio: &Portfolio,
    gateway: &BrokerGateway,
    symbol: &str,
    shares: u32,
    price: f64,
    reason: ExitReason,
    now: DateTime<Utc>,
) -> Option<Trade> {
    let plan = portfolio.plan_sell(symbol, shares, reason, now).ok()?;
    let order = OrderRequest {
        symbol: symbol.to_string(),
        exchange: "NSE".to_string(),
        qty: plan.shares,
        side: Side::Sell,
        price: Some(price),
        order_type: OrderType::Limit,
        product: plan.product,
    };
    let fill = gateway.place_and_confirm(&order).await.ok()?;
    portfolio
        .apply_sell_fill(&plan, fill.filled_qty, fill.avg_price, now)
        .ok()
}

fn bar_time(bar: &Bar) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(bar.timestamp, 0).unwrap_or_else(Utc::now)
}
