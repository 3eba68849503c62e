// =============================================================================
// F&O Strategy Composer
// =============================================================================
//
// Picks a structured options strategy per index from the regime and the
// aggregated signal, then executes the legs atomically as a group.
//
// Entry guards, evaluated in order:
//   1. Per-index engagement — at most one structure per underlying.
//   2. Correlation block — a held index correlated at or above the threshold
//      blocks the candidate.
//   3. Confidence gate — aggregated confidence must clear the F&O floor.
//   4. Strategy table — {trend x volatility} selects the structure; extreme
//      volatility selects nothing.
//
// Execution places all legs through the gateway first; if any leg fails, the
// completed legs are reversed before anything touches the portfolio, so the
// group is all-or-nothing. All legs share one transaction id.
// =============================================================================

pub mod characteristics;
pub mod contracts;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::AggregatedSignal;
use crate::config::EngineConfig;
use crate::error::{ExecutionError, RiskError};
use crate::gateway::{BrokerGateway, OrderRequest, OrderType, ProductType};
use crate::portfolio::{
    EntryRequest, ExitReason, GroupLeg, InstrumentKind, Portfolio, StructuredGroup, Trade,
};
use crate::regime::{RegimeState, Trend, VolatilityBucket};
use crate::types::{OptionRight, Side};

pub use characteristics::{default_index_table, CorrelationMatrix, IndexCharacteristics};
pub use contracts::{
    build_structure, next_weekly_expiry, worst_case_loss, FnoStrategyKind, PlannedLeg,
    StructurePlan,
};

/// Minimum days between today and a usable weekly expiry.
const MIN_EXPIRY_DAYS: i64 = 2;

/// Why an index was skipped this scan. Risk-type blocks (engagement,
/// correlation, exposure) carry the shared [`RiskError`] taxonomy; the
/// remaining variants are composer-local gates.
#[derive(Debug, Error)]
pub enum FnoBlock {
    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error("low_confidence({confidence:.2}<{required:.2})")]
    LowConfidence { confidence: f64, required: f64 },

    #[error("extreme_volatility")]
    ExtremeVolatility,

    #[error("regime_unavailable({0})")]
    RegimeUnavailable(String),

    #[error("invalid_premium({symbol})")]
    InvalidPremium { symbol: String },
}

pub struct FnoComposer {
    indices: Vec<IndexCharacteristics>,
    correlations: CorrelationMatrix,
    rho_block: f64,
    min_confidence: f64,
    sigma_k: f64,
    max_trade_risk_pct: f64,
}

impl FnoComposer {
    pub fn new(config: &EngineConfig) -> Self {
        let mut indices = default_index_table();
        indices.sort_by_key(|c| c.priority_rank);
        Self {
            indices,
            correlations: CorrelationMatrix::default_for_indices(),
            rho_block: config.correlation_block_threshold,
            min_confidence: config.min_fno_confidence,
            sigma_k: config.strangle_sigma_k,
            max_trade_risk_pct: config.max_trade_risk_pct,
        }
    }

    /// Indices in scan order (priority rank ascending).
    pub fn indices(&self) -> &[IndexCharacteristics] {
        &self.indices
    }

    /// The {trend x volatility} decision table. `None` means stand aside.
    pub fn select_strategy(trend: Trend, volatility: VolatilityBucket) -> Option<FnoStrategyKind> {
        use FnoStrategyKind::*;
        match volatility {
            VolatilityBucket::Low | VolatilityBucket::Normal => Some(match trend {
                Trend::Bullish => BullCallSpread,
                Trend::Sideways => IronCondor,
                Trend::Bearish => BearPutSpread,
            }),
            VolatilityBucket::High => Some(match trend {
                Trend::Bullish | Trend::Bearish => LongStraddle,
                Trend::Sideways => ShortStrangle,
            }),
            VolatilityBucket::Extreme => None,
        }
    }

    /// Run the entry guards and construct the structure for `index`.
    pub fn plan_entry(
        &self,
        index: &IndexCharacteristics,
        portfolio: &Portfolio,
        regime: Option<&RegimeState>,
        signal: &AggregatedSignal,
        spot: f64,
        today: NaiveDate,
    ) -> Result<StructurePlan, FnoBlock> {
        let engaged = portfolio.engaged_underlyings();

        if engaged.iter().any(|u| u == &index.symbol) {
            return Err(RiskError::AlreadyEngaged(index.symbol.clone()).into());
        }

        for held in &engaged {
            let rho = self.correlations.get(&index.symbol, held);
            if rho.abs() >= self.rho_block {
                return Err(RiskError::CorrelationBlock {
                    candidate: index.symbol.clone(),
                    held: held.clone(),
                    rho,
                }
                .into());
            }
        }

        let regime = regime.ok_or_else(|| FnoBlock::RegimeUnavailable(index.symbol.clone()))?;

        if signal.confidence < self.min_confidence {
            return Err(FnoBlock::LowConfidence {
                confidence: signal.confidence,
                required: self.min_confidence,
            });
        }

        let kind = Self::select_strategy(regime.trend, regime.volatility)
            .ok_or(FnoBlock::ExtremeVolatility)?;

        let expiry = next_weekly_expiry(today, index.expiry_weekday, MIN_EXPIRY_DAYS);
        let days_to_expiry = (expiry - today).num_days().max(1) as f64;
        // Daily sigma in points, scaled to the holding horizon.
        let sigma_points = spot * (regime.atr_pct / 100.0) * days_to_expiry.sqrt();

        let plan = build_structure(kind, index, spot, sigma_points, self.sigma_k, expiry);

        // Informational only: premium-capture likelihood, never a gate.
        let profit_confidence = (signal.confidence * regime.confidence).min(1.0);
        info!(
            index = %index.symbol,
            strategy = %kind,
            expiry = %expiry,
            spot,
            sigma_points = format!("{sigma_points:.1}"),
            profit_confidence = format!("{profit_confidence:.2}"),
            "structure planned"
        );

        Ok(plan)
    }

    /// Quote every leg, falling back to a synthetic estimate when the chain
    /// has no quote yet. A non-positive premium anywhere aborts the entry.
    pub async fn fetch_premiums(
        &self,
        plan: &StructurePlan,
        gateway: &BrokerGateway,
        spot: f64,
    ) -> Result<Vec<f64>, FnoBlock> {
        let mut premiums = Vec::with_capacity(plan.legs.len());
        for leg in &plan.legs {
            let symbol = leg.contract.trading_symbol();
            let premium = match gateway.get_quote(&symbol).await {
                Ok(quote) if quote.last > 0.0 => quote.last,
                _ => synthetic_premium(
                    spot,
                    leg.contract.strike,
                    leg.contract.right,
                    plan.sigma_points,
                ),
            };
            if !(premium.is_finite() && premium > 0.0) {
                return Err(FnoBlock::InvalidPremium { symbol });
            }
            premiums.push(premium);
        }
        Ok(premiums)
    }

    /// Enforce the worst-case-loss budget.
    pub fn check_max_loss(
        &self,
        plan: &StructurePlan,
        premiums: &[f64],
        index: &IndexCharacteristics,
        cash: f64,
    ) -> Result<f64, FnoBlock> {
        let max_loss = worst_case_loss(plan, premiums, index).ok_or_else(|| {
            FnoBlock::InvalidPremium {
                symbol: plan
                    .legs
                    .first()
                    .map(|l| l.contract.trading_symbol())
                    .unwrap_or_else(|| plan.underlying.clone()),
            }
        })?;

        let budget = cash * self.max_trade_risk_pct;
        if max_loss > budget {
            return Err(RiskError::ExposureExceeded {
                detail: format!("max loss {max_loss:.0} exceeds budget {budget:.0}"),
            }
            .into());
        }
        Ok(max_loss)
    }

    /// Place all legs as one group. If any leg fails, completed legs are
    /// reversed through the gateway and nothing reaches the portfolio.
    pub async fn execute_entry(
        &self,
        plan: &StructurePlan,
        premiums: &[f64],
        index: &IndexCharacteristics,
        gateway: &BrokerGateway,
        portfolio: &Portfolio,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trade>, ExecutionError> {
        let transaction_id = Uuid::new_v4().to_string();

        // --- Phase 1: broker fills for every leg -------------------------
        let mut fills = Vec::with_capacity(plan.legs.len());
        for (leg, &premium) in plan.legs.iter().zip(premiums) {
            let symbol = leg.contract.trading_symbol();
            let request = OrderRequest {
                symbol: symbol.clone(),
                exchange: leg.contract.exchange.to_string(),
                qty: leg.qty,
                side: leg.side,
                price: Some(premium),
                order_type: OrderType::Limit,
                product: ProductType::Nrml,
            };

            match gateway.place_and_confirm(&request).await {
                Ok(fill) if fill.fill_ratio() >= crate::gateway::PARTIAL_FILL_FLOOR => {
                    fills.push((leg, fill));
                }
                Ok(fill) => {
                    let filled = fill.filled_qty;
                    warn!(
                        symbol = %symbol,
                        filled,
                        requested = leg.qty,
                        "leg underfilled — reversing group"
                    );
                    // Reverse the prior legs and the underfilled portion that
                    // did execute.
                    self.reverse_fills(&fills, gateway).await;
                    self.reverse_fills(&[(leg, fill)], gateway).await;
                    return Err(ExecutionError::Order(
                        crate::error::OrderError::PartialShortfall {
                            filled,
                            requested: leg.qty,
                        },
                    ));
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "leg failed — reversing group");
                    self.reverse_fills(&fills, gateway).await;
                    return Err(ExecutionError::Order(e));
                }
            }
        }

        // --- Phase 2: portfolio mutation ---------------------------------
        let mut trades = Vec::with_capacity(fills.len());
        let mut group_legs = Vec::with_capacity(fills.len());

        for (leg, fill) in &fills {
            let symbol = leg.contract.trading_symbol();
            match leg.side {
                Side::Buy => {
                    let request = EntryRequest {
                        symbol: symbol.clone(),
                        requested_shares: fill.filled_qty,
                        price_hint: fill.avg_price,
                        confidence: 0.0,
                        sector: "FNO".to_string(),
                        atr: None,
                        lot_size: Some(index.lot_size),
                        kind: InstrumentKind::Option,
                        product: ProductType::Nrml,
                        transaction_id: Some(transaction_id.clone()),
                    };
                    let buy_plan = portfolio.plan_buy(&request, now)?;
                    let trade =
                        portfolio.apply_buy_fill(&buy_plan, fill.filled_qty, fill.avg_price, now)?;
                    trades.push(trade);
                }
                Side::Sell => {
                    let trade = portfolio.apply_short_open(
                        &symbol,
                        fill.filled_qty,
                        fill.avg_price,
                        &transaction_id,
                        now,
                    )?;
                    trades.push(trade);
                }
            }
            group_legs.push(GroupLeg {
                symbol,
                side: leg.side,
                qty: fill.filled_qty,
                entry_premium: fill.avg_price,
                closed: false,
            });
        }

        portfolio.register_structured(StructuredGroup {
            transaction_id: transaction_id.clone(),
            underlying: plan.underlying.clone(),
            strategy: plan.kind.to_string(),
            legs: group_legs,
            created_at: now,
        });

        info!(
            underlying = %plan.underlying,
            strategy = %plan.kind,
            transaction_id = %transaction_id,
            legs = trades.len(),
            "structured entry executed"
        );

        Ok(trades)
    }

    /// Close every live leg of a structured group, sharing the group's
    /// transaction id across the exit trades.
    pub async fn unwind_group(
        &self,
        group: &StructuredGroup,
        gateway: &BrokerGateway,
        portfolio: &Portfolio,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Vec<Trade> {
        let mut trades = Vec::new();

        for leg in &group.legs {
            match leg.side {
                Side::Buy => {
                    let Some(position) = portfolio.position(&leg.symbol) else {
                        continue;
                    };
                    let premium = match gateway.get_quote(&leg.symbol).await {
                        Ok(q) if q.last > 0.0 => q.last,
                        _ => position.entry_price,
                    };
                    let request = OrderRequest {
                        symbol: leg.symbol.clone(),
                        exchange: "NFO".to_string(),
                        qty: position.shares,
                        side: Side::Sell,
                        price: Some(premium),
                        order_type: OrderType::Limit,
                        product: ProductType::Nrml,
                    };
                    let Ok(fill) = gateway.place_and_confirm(&request).await else {
                        warn!(symbol = %leg.symbol, "long leg unwind order failed");
                        continue;
                    };
                    match portfolio
                        .plan_sell(&leg.symbol, position.shares, reason, now)
                        .and_then(|p| portfolio.apply_sell_fill(&p, fill.filled_qty, fill.avg_price, now))
                    {
                        Ok(trade) => trades.push(trade),
                        Err(e) => warn!(symbol = %leg.symbol, error = %e, "long leg unwind failed"),
                    }
                }
                Side::Sell if !leg.closed => {
                    let premium = match gateway.get_quote(&leg.symbol).await {
                        Ok(q) if q.last > 0.0 => q.last,
                        _ => leg.entry_premium,
                    };
                    let request = OrderRequest {
                        symbol: leg.symbol.clone(),
                        exchange: "NFO".to_string(),
                        qty: leg.qty,
                        side: Side::Buy,
                        price: Some(premium),
                        order_type: OrderType::Limit,
                        product: ProductType::Nrml,
                    };
                    let Ok(fill) = gateway.place_and_confirm(&request).await else {
                        warn!(symbol = %leg.symbol, "short leg buyback order failed");
                        continue;
                    };
                    match portfolio.close_short_leg(
                        &group.transaction_id,
                        &leg.symbol,
                        fill.avg_price,
                        reason,
                        now,
                    ) {
                        Ok(trade) => trades.push(trade),
                        Err(e) => warn!(symbol = %leg.symbol, error = %e, "short leg buyback failed"),
                    }
                }
                Side::Sell => {}
            }
        }

        portfolio.prune_structured();
        trades
    }

    /// Best-effort reversal of already-confirmed leg fills (opposite orders
    /// through the gateway; the portfolio was never touched).
    async fn reverse_fills(
        &self,
        fills: &[(&PlannedLeg, crate::gateway::OrderFill)],
        gateway: &BrokerGateway,
    ) {
        for (leg, fill) in fills {
            if fill.filled_qty == 0 {
                continue;
            }
            let reverse_side = match leg.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            };
            let request = OrderRequest {
                symbol: leg.contract.trading_symbol(),
                exchange: leg.contract.exchange.to_string(),
                qty: fill.filled_qty,
                side: reverse_side,
                price: Some(fill.avg_price),
                order_type: OrderType::Limit,
                product: ProductType::Nrml,
            };
            if let Err(e) = gateway.place_and_confirm(&request).await {
                warn!(
                    symbol = %request.symbol,
                    error = %e,
                    "failed to reverse leg — manual reconciliation required"
                );
            }
        }
    }
}

/// Rough premium when the option chain has no quote yet (paper mode, fresh
/// strikes): intrinsic value plus a time-value hump that decays with distance
/// from the money.
fn synthetic_premium(spot: f64, strike: f64, right: OptionRight, sigma_points: f64) -> f64 {
    let intrinsic = match right {
        OptionRight::CE => (spot - strike).max(0.0),
        OptionRight::PE => (strike - spot).max(0.0),
    };
    let sigma = sigma_points.max(1.0);
    let distance = (spot - strike).abs() / sigma;
    let time_value = 0.4 * sigma / (1.0 + distance * distance);
    intrinsic + time_value
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BrokerClient, CircuitBreaker, PaperBroker, RateLimiter};
    use crate::portfolio::PortfolioParams;
    use crate::types::TradingMode;
    use chrono::TimeZone;
    use std::time::Duration;

    fn composer() -> FnoComposer {
        FnoComposer::new(&EngineConfig::default())
    }

    fn portfolio() -> Portfolio {
        Portfolio::new(
            1_000_000.0,
            PortfolioParams::from_config(&EngineConfig::default()),
            TradingMode::Paper,
        )
    }

    fn regime(trend: Trend, volatility: VolatilityBucket) -> RegimeState {
        RegimeState {
            trend,
            volatility,
            confidence: 0.8,
            atr_pct: 1.0,
            slope: 0.001,
        }
    }

    fn signal(confidence: f64) -> AggregatedSignal {
        AggregatedSignal {
            symbol: "NIFTY".to_string(),
            action: crate::types::Action::Buy,
            confidence,
            reasons: vec!["test".to_string()],
            atr: Some(200.0),
            last_close: Some(24_500.0),
        }
    }

    fn index(symbol: &str) -> IndexCharacteristics {
        default_index_table()
            .into_iter()
            .find(|c| c.symbol == symbol)
            .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 4, 5, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 4).unwrap()
    }

    #[test]
    fn strategy_table_matches_spec() {
        use FnoStrategyKind::*;
        use Trend::*;
        use VolatilityBucket::*;
        assert_eq!(FnoComposer::select_strategy(Bullish, Normal), Some(BullCallSpread));
        assert_eq!(FnoComposer::select_strategy(Sideways, Low), Some(IronCondor));
        assert_eq!(FnoComposer::select_strategy(Bearish, Normal), Some(BearPutSpread));
        assert_eq!(FnoComposer::select_strategy(Bullish, High), Some(LongStraddle));
        assert_eq!(FnoComposer::select_strategy(Bearish, High), Some(LongStraddle));
        assert_eq!(FnoComposer::select_strategy(Sideways, High), Some(ShortStrangle));
        assert_eq!(FnoComposer::select_strategy(Bullish, Extreme), None);
        assert_eq!(FnoComposer::select_strategy(Sideways, Extreme), None);
    }

    #[test]
    fn indices_scan_in_priority_order() {
        let c = composer();
        let ranks: Vec<u8> = c.indices().iter().map(|i| i.priority_rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert_eq!(c.indices()[0].symbol, "NIFTY");
    }

    #[test]
    fn low_confidence_blocks() {
        let c = composer();
        let p = portfolio();
        let err = c
            .plan_entry(
                &index("NIFTY"),
                &p,
                Some(&regime(Trend::Bullish, VolatilityBucket::Normal)),
                &signal(0.3),
                24_500.0,
                today(),
            )
            .unwrap_err();
        assert!(matches!(err, FnoBlock::LowConfidence { .. }));
    }

    #[test]
    fn extreme_volatility_blocks() {
        let c = composer();
        let p = portfolio();
        let err = c
            .plan_entry(
                &index("NIFTY"),
                &p,
                Some(&regime(Trend::Bullish, VolatilityBucket::Extreme)),
                &signal(0.8),
                24_500.0,
                today(),
            )
            .unwrap_err();
        assert!(matches!(err, FnoBlock::ExtremeVolatility));
    }

    #[test]
    fn correlation_blocks_sensex_when_nifty_held() {
        let c = composer();
        let p = portfolio();
        p.apply_short_open("NIFTY25AUG24700CE", 75, 80.0, "txn-held", t0())
            .unwrap();
        p.register_structured(StructuredGroup {
            transaction_id: "txn-held".to_string(),
            underlying: "NIFTY".to_string(),
            strategy: "long_straddle".to_string(),
            legs: vec![GroupLeg {
                symbol: "NIFTY25AUG24700CE".to_string(),
                side: Side::Sell,
                qty: 75,
                entry_premium: 80.0,
                closed: false,
            }],
            created_at: t0(),
        });

        let cash_before = p.cash();
        let err = c
            .plan_entry(
                &index("SENSEX"),
                &p,
                Some(&regime(Trend::Bullish, VolatilityBucket::Normal)),
                &signal(0.8),
                81_000.0,
                today(),
            )
            .unwrap_err();
        match err {
            FnoBlock::Risk(RiskError::CorrelationBlock { candidate, held, rho }) => {
                assert_eq!(candidate, "SENSEX");
                assert_eq!(held, "NIFTY");
                assert!(rho >= 0.9);
            }
            other => panic!("expected correlation block, got {other:?}"),
        }
        // Nothing was placed; cash unchanged.
        assert!((p.cash() - cash_before).abs() < 1e-10);
    }

    #[test]
    fn engaged_index_blocks_itself() {
        let c = composer();
        let p = portfolio();
        p.apply_short_open("NIFTY25AUG24700CE", 75, 80.0, "txn-held", t0())
            .unwrap();
        p.register_structured(StructuredGroup {
            transaction_id: "txn-held".to_string(),
            underlying: "NIFTY".to_string(),
            strategy: "iron_condor".to_string(),
            legs: vec![GroupLeg {
                symbol: "NIFTY25AUG24700CE".to_string(),
                side: Side::Sell,
                qty: 75,
                entry_premium: 80.0,
                closed: false,
            }],
            created_at: t0(),
        });

        let err = c
            .plan_entry(
                &index("NIFTY"),
                &p,
                Some(&regime(Trend::Sideways, VolatilityBucket::Normal)),
                &signal(0.8),
                24_500.0,
                today(),
            )
            .unwrap_err();
        assert!(matches!(err, FnoBlock::Risk(RiskError::AlreadyEngaged(_))));
    }

    #[test]
    fn synthetic_premium_shapes() {
        // ATM premium is pure time value.
        let atm = synthetic_premium(24_500.0, 24_500.0, OptionRight::CE, 200.0);
        assert!((atm - 80.0).abs() < 1e-9);
        // ITM call carries intrinsic.
        let itm = synthetic_premium(24_700.0, 24_500.0, OptionRight::CE, 200.0);
        assert!(itm > 200.0);
        // Far OTM decays toward zero but stays positive.
        let otm = synthetic_premium(24_500.0, 26_500.0, OptionRight::CE, 200.0);
        assert!(otm > 0.0 && otm < atm);
    }

    #[test]
    fn max_loss_budget_enforced() {
        let c = composer();
        let idx = index("NIFTY");
        let plan = build_structure(
            FnoStrategyKind::LongStraddle,
            &idx,
            24_500.0,
            200.0,
            1.0,
            NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
        );
        // 290 * 75 = 21,750 max loss. Budget at 3 % of 1M = 30,000: passes.
        assert!(c.check_max_loss(&plan, &[150.0, 140.0], &idx, 1_000_000.0).is_ok());
        // Budget at 3 % of 100k = 3,000: blocked.
        let err = c
            .check_max_loss(&plan, &[150.0, 140.0], &idx, 100_000.0)
            .unwrap_err();
        assert!(matches!(
            err,
            FnoBlock::Risk(RiskError::ExposureExceeded { .. })
        ));
        // Zero premium: invalid.
        let err = c.check_max_loss(&plan, &[0.0, 140.0], &idx, 1_000_000.0).unwrap_err();
        assert!(matches!(err, FnoBlock::InvalidPremium { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn straddle_entry_executes_atomically() {
        let c = composer();
        let p = portfolio();
        let broker = PaperBroker::new();
        // Seed the chain so leg quotes resolve without tripping the breaker.
        broker.set_price("NIFTY25AUG24500CE", 170.0);
        broker.set_price("NIFTY25AUG24500PE", 165.0);
        let g = BrokerGateway::new(
            BrokerClient::Paper(broker),
            RateLimiter::new(100, 6000),
            CircuitBreaker::new(5, Duration::from_secs(60)),
            Duration::from_secs(30),
        );
        let idx = index("NIFTY");

        let plan = c
            .plan_entry(
                &idx,
                &p,
                Some(&regime(Trend::Bullish, VolatilityBucket::High)),
                &signal(0.8),
                24_500.0,
                today(),
            )
            .unwrap();
        assert_eq!(plan.kind, FnoStrategyKind::LongStraddle);

        let premiums = c.fetch_premiums(&plan, &g, 24_500.0).await.unwrap();
        assert_eq!(premiums.len(), 2);

        let trades = c
            .execute_entry(&plan, &premiums, &idx, &g, &p, t0())
            .await
            .unwrap();
        assert_eq!(trades.len(), 2);
        // Both legs share one transaction id.
        let txn: Vec<_> = trades.iter().filter_map(|t| t.transaction_id.clone()).collect();
        assert_eq!(txn.len(), 2);
        assert_eq!(txn[0], txn[1]);

        assert_eq!(p.engaged_underlyings(), vec!["NIFTY".to_string()]);
        assert_eq!(p.position_count(), 2);

        // Unwind closes every leg and releases the engagement.
        let group = p.structured_groups().pop().unwrap();
        let exits = c
            .unwind_group(&group, &g, &p, ExitReason::DayEndClose, t0())
            .await;
        assert_eq!(exits.len(), 2);
        assert_eq!(p.position_count(), 0);
        assert!(p.engaged_underlyings().is_empty());
    }
}
