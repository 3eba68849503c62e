// =============================================================================
// Portfolio — cash and position accounting under one lock
// =============================================================================
//
// All reads and writes of cash, positions, counters, cooldowns, and trade
// history happen inside the single portfolio mutex. Compound operations are
// split so the lock is never held across an await point:
//
//   plan_buy   — validation + sizing (steps 1–5 of the entry flow), no
//                mutation; the caller then places the order;
//   apply_buy_fill — atomic mutation from the confirmed fill (steps 7–8).
//
// Sells follow the same plan/apply split. `update_risk_exits` iterates a
// snapshot of position keys, ratchets trailing stops in place, and returns
// exit intents for the caller to execute. Trade-history append is always the
// last step of a mutation, so an observer seeing a new trade can rely on the
// portfolio already reflecting it.
// =============================================================================

pub mod costs;
pub mod position;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::gateway::ProductType;
use crate::types::{Side, TradingMode};

pub use costs::{compute_fees, FeeBreakdown, InstrumentKind};
pub use position::{ExitReason, GroupLeg, Position, StructuredGroup, Trade};

/// In-memory trade history ring size.
const TRADE_HISTORY_CAP: usize = 10_000;

/// Break-even clamp applied to trailing stops (entry * 1.001).
const BREAK_EVEN_MARGIN: f64 = 1.001;

// ---------------------------------------------------------------------------
// Parameters & counters
// ---------------------------------------------------------------------------

/// Sizing and exit parameters, extracted from the engine config once.
#[derive(Debug, Clone)]
pub struct PortfolioParams {
    pub risk_per_trade_pct: f64,
    pub atr_stop_multiplier: f64,
    pub atr_target_multiplier: f64,
    pub trailing_activation_multiplier: f64,
    pub trailing_stop_multiplier: f64,
    pub sl_fallback_pct: f64,
    pub tp_fallback_pct: f64,
    pub max_position_value: f64,
    pub max_positions: usize,
    pub cooldown_normal: Duration,
    pub cooldown_stop_loss: Duration,
    pub min_holding_period: Duration,
}

impl PortfolioParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            risk_per_trade_pct: config.risk_per_trade_pct,
            atr_stop_multiplier: config.atr_stop_multiplier,
            atr_target_multiplier: config.atr_target_multiplier,
            trailing_activation_multiplier: config.trailing_activation_multiplier,
            trailing_stop_multiplier: config.trailing_stop_multiplier,
            sl_fallback_pct: config.sl_fallback_pct,
            tp_fallback_pct: config.tp_fallback_pct,
            max_position_value: config.max_position_value,
            max_positions: config.max_positions,
            cooldown_normal: Duration::from_secs(config.cooldown_normal_secs),
            cooldown_stop_loss: Duration::from_secs(config.cooldown_stop_loss_secs),
            min_holding_period: Duration::from_secs(config.min_holding_period_secs),
        }
    }
}

/// Running performance counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PortfolioCounters {
    pub total_trades: u64,
    pub buy_trades: u64,
    pub sell_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub total_pnl: f64,
}

/// Durable snapshot of the portfolio. `BTreeMap` keys give a canonical JSON
/// encoding, so identical portfolios serialise byte-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub initial_cash: f64,
    pub cash: f64,
    pub positions: BTreeMap<String, Position>,
    pub structured: BTreeMap<String, StructuredGroup>,
    pub counters: PortfolioCounters,
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Plans & intents
// ---------------------------------------------------------------------------

/// Entry request as the scheduler/composer hands it over.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub symbol: String,
    pub requested_shares: u32,
    pub price_hint: f64,
    pub confidence: f64,
    pub sector: String,
    pub atr: Option<f64>,
    pub lot_size: Option<u32>,
    pub kind: InstrumentKind,
    pub product: ProductType,
    pub transaction_id: Option<String>,
}

/// Validated, sized entry: nothing has been mutated yet.
#[derive(Debug, Clone)]
pub struct BuyPlan {
    pub symbol: String,
    pub shares: u32,
    pub price_hint: f64,
    pub confidence: f64,
    pub sector: String,
    pub atr: Option<f64>,
    pub lot_size: Option<u32>,
    pub kind: InstrumentKind,
    pub product: ProductType,
    pub transaction_id: Option<String>,
}

/// Validated exit: nothing has been mutated yet.
#[derive(Debug, Clone)]
pub struct SellPlan {
    pub symbol: String,
    pub shares: u32,
    pub reason: ExitReason,
    pub kind: InstrumentKind,
    pub product: ProductType,
    pub transaction_id: Option<String>,
}

/// A position the risk check wants closed.
#[derive(Debug, Clone)]
pub struct ExitIntent {
    pub symbol: String,
    pub shares: u32,
    pub reason: ExitReason,
    /// Price that triggered the exit; used as the order hint.
    pub ref_price: f64,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

struct Inner {
    cash: f64,
    positions: HashMap<String, Position>,
    structured: HashMap<String, StructuredGroup>,
    trades: VecDeque<Trade>,
    counters: PortfolioCounters,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

pub struct Portfolio {
    inner: Mutex<Inner>,
    initial_cash: f64,
    params: PortfolioParams,
    mode: TradingMode,
}

impl Portfolio {
    pub fn new(initial_cash: f64, params: PortfolioParams, mode: TradingMode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cash: initial_cash,
                positions: HashMap::new(),
                structured: HashMap::new(),
                trades: VecDeque::with_capacity(1024),
                counters: PortfolioCounters::default(),
                cooldowns: HashMap::new(),
            }),
            initial_cash,
            params,
            mode,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn cash(&self) -> f64 {
        self.inner.lock().cash
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.inner.lock().positions.contains_key(symbol)
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.inner.lock().positions.get(symbol).cloned()
    }

    pub fn position_count(&self) -> usize {
        self.inner.lock().positions.len()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.inner.lock().positions.values().cloned().collect()
    }

    pub fn counters(&self) -> PortfolioCounters {
        self.inner.lock().counters.clone()
    }

    pub fn recent_trades(&self, count: usize) -> Vec<Trade> {
        let inner = self.inner.lock();
        inner.trades.iter().rev().take(count).rev().cloned().collect()
    }

    pub fn trades_for_day(&self, day: NaiveDate) -> Vec<Trade> {
        let inner = self.inner.lock();
        inner
            .trades
            .iter()
            .filter(|t| t.trading_day == day)
            .cloned()
            .collect()
    }

    pub fn cooldown_active(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.inner
            .lock()
            .cooldowns
            .get(symbol)
            .is_some_and(|&until| until > now)
    }

    /// cash + long position values − open short-leg buyback values, at the
    /// given marks. Anything without a mark falls back to its entry price.
    pub fn mark_to_market(&self, prices: &HashMap<String, f64>) -> f64 {
        let inner = self.inner.lock();
        let longs: f64 = inner
            .positions
            .values()
            .map(|p| p.value_at(prices.get(&p.symbol).copied().unwrap_or(p.entry_price)))
            .sum();
        let shorts: f64 = inner
            .structured
            .values()
            .flat_map(|g| g.open_short_legs())
            .map(|leg| {
                f64::from(leg.qty) * prices.get(&leg.symbol).copied().unwrap_or(leg.entry_premium)
            })
            .sum();
        inner.cash + longs - shorts
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Validate and size an entry. No state is changed.
    pub fn plan_buy(
        &self,
        request: &EntryRequest,
        now: DateTime<Utc>,
    ) -> Result<BuyPlan, ExecutionError> {
        if request.requested_shares == 0 {
            return Err(ExecutionError::BadInput("requested_shares must be > 0".into()));
        }
        if !(request.price_hint.is_finite() && request.price_hint > 0.0) {
            return Err(ExecutionError::BadInput(format!(
                "invalid price hint {}",
                request.price_hint
            )));
        }
        if request.symbol.len() < 2
            || !request
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(ExecutionError::BadInput(format!(
                "malformed symbol '{}'",
                request.symbol
            )));
        }

        let inner = self.inner.lock();

        if inner.positions.contains_key(&request.symbol) {
            return Err(ExecutionError::BadInput(format!(
                "position already open in {}",
                request.symbol
            )));
        }
        if inner.positions.len() >= self.params.max_positions {
            return Err(ExecutionError::BadInput(format!(
                "position limit {} reached",
                self.params.max_positions
            )));
        }
        if let Some(&until) = inner.cooldowns.get(&request.symbol) {
            if until > now {
                return Err(ExecutionError::BadInput(format!(
                    "{} in cooldown until {}",
                    request.symbol, until
                )));
            }
        }

        // --- Sizing -------------------------------------------------------
        let mut shares = match request.atr {
            Some(atr) if atr > 0.0 => {
                let max_loss_per_share = atr * self.params.atr_stop_multiplier;
                let risk_budget = inner.cash * self.params.risk_per_trade_pct;
                let allowed = (risk_budget / max_loss_per_share).floor() as u32;
                request.requested_shares.min(allowed)
            }
            // ATR unavailable (or zero): size by confidence bucket.
            _ => {
                let value_pct = if request.confidence >= 0.8 {
                    0.10
                } else if request.confidence >= 0.6 {
                    0.06
                } else {
                    0.04
                };
                let allowed = (inner.cash * value_pct / request.price_hint).floor() as u32;
                request.requested_shares.min(allowed)
            }
        };

        // Absolute per-position value cap.
        let cap_allowed = (self.params.max_position_value / request.price_hint).floor() as u32;
        shares = shares.min(cap_allowed);
        if cap_allowed == 0 {
            return Err(ExecutionError::PositionCap {
                value: request.price_hint,
                cap: self.params.max_position_value,
            });
        }

        // Lot-size rounding for derivatives.
        if let Some(lot) = request.lot_size {
            if lot == 0 {
                return Err(ExecutionError::BadInput("lot_size must be > 0".into()));
            }
            shares = (shares / lot) * lot;
            if shares == 0 {
                return Err(ExecutionError::InsufficientSize { lot_size: lot });
            }
        }
        if shares == 0 {
            return Err(ExecutionError::InsufficientSize { lot_size: 1 });
        }

        // Expected cost including fees.
        let amount = f64::from(shares) * request.price_hint;
        let fees = compute_fees(request.kind, amount, Side::Buy).total();
        let total_cost = amount + fees;
        if total_cost > inner.cash {
            return Err(ExecutionError::InsufficientCash {
                required: total_cost,
                available: inner.cash,
            });
        }

        Ok(BuyPlan {
            symbol: request.symbol.clone(),
            shares,
            price_hint: request.price_hint,
            confidence: request.confidence,
            sector: request.sector.clone(),
            atr: request.atr,
            lot_size: request.lot_size,
            kind: request.kind,
            product: request.product,
            transaction_id: request.transaction_id.clone(),
        })
    }

    /// Apply a confirmed buy fill atomically: deduct cash, create the
    /// position, append the trade, bump counters.
    pub fn apply_buy_fill(
        &self,
        plan: &BuyPlan,
        filled_qty: u32,
        avg_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        if filled_qty == 0 || !(avg_price.is_finite() && avg_price > 0.0) {
            return Err(ExecutionError::BadInput(format!(
                "invalid fill: qty={filled_qty} price={avg_price}"
            )));
        }

        let mut inner = self.inner.lock();

        let amount = f64::from(filled_qty) * avg_price;
        let fees = compute_fees(plan.kind, amount, Side::Buy).total();
        let total_cost = amount + fees;
        if total_cost > inner.cash {
            return Err(ExecutionError::InsufficientCash {
                required: total_cost,
                available: inner.cash,
            });
        }

        // SL/TP: ATR distances, with a percentage fallback when the ATR is
        // missing, zero, or so large the stop would go non-positive.
        let (stop_loss, take_profit) = match plan.atr {
            Some(atr) if atr > 0.0 && avg_price - atr * self.params.atr_stop_multiplier > 0.0 => (
                avg_price - atr * self.params.atr_stop_multiplier,
                avg_price + atr * self.params.atr_target_multiplier,
            ),
            _ => (
                avg_price * (1.0 - self.params.sl_fallback_pct),
                avg_price * (1.0 + self.params.tp_fallback_pct),
            ),
        };

        let position = Position {
            symbol: plan.symbol.clone(),
            shares: filled_qty,
            entry_price: avg_price,
            entry_time: now,
            stop_loss,
            take_profit,
            confidence: plan.confidence,
            sector: plan.sector.clone(),
            atr: plan.atr,
            lot_size: plan.lot_size,
            product: plan.product,
        };
        debug_assert!(position.bounds_valid());

        inner.cash -= total_cost;
        inner.positions.insert(plan.symbol.clone(), position);
        inner.counters.total_trades += 1;
        inner.counters.buy_trades += 1;

        let trade = Trade {
            timestamp: now,
            symbol: plan.symbol.clone(),
            side: Side::Buy,
            shares: filled_qty,
            price: avg_price,
            fees,
            pnl: None,
            mode: self.mode,
            confidence: plan.confidence,
            sector: plan.sector.clone(),
            cash_balance_after: inner.cash,
            atr: plan.atr,
            trading_day: now.date_naive(),
            reason: None,
            transaction_id: plan.transaction_id.clone(),
        };

        info!(
            symbol = %trade.symbol,
            shares = trade.shares,
            price = trade.price,
            fees = trade.fees,
            stop_loss,
            take_profit,
            cash_after = trade.cash_balance_after,
            "buy executed"
        );

        Self::push_trade(&mut inner, trade.clone());
        Ok(trade)
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Validate an exit. No state is changed.
    pub fn plan_sell(
        &self,
        symbol: &str,
        shares: u32,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<SellPlan, ExecutionError> {
        let inner = self.inner.lock();
        let position = inner
            .positions
            .get(symbol)
            .ok_or_else(|| ExecutionError::NoPosition(symbol.to_string()))?;

        if shares == 0 || shares > position.shares {
            return Err(ExecutionError::BadInput(format!(
                "sell qty {shares} outside open quantity {}",
                position.shares
            )));
        }

        if !reason.bypasses_holding_period() {
            let held = now.signed_duration_since(position.entry_time);
            let min_hold = chrono::Duration::from_std(self.params.min_holding_period)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
            if held < min_hold {
                return Err(ExecutionError::HoldingPeriod {
                    symbol: symbol.to_string(),
                    held_secs: held.num_seconds(),
                });
            }
        }

        let kind = match position.product {
            ProductType::Nrml => InstrumentKind::Option,
            _ => InstrumentKind::Equity,
        };

        Ok(SellPlan {
            symbol: symbol.to_string(),
            shares,
            reason,
            kind,
            product: position.product,
            transaction_id: None,
        })
    }

    /// Apply a confirmed sell fill atomically: credit net proceeds, realise
    /// PnL, update counters, shrink or delete the position, arm the cooldown.
    pub fn apply_sell_fill(
        &self,
        plan: &SellPlan,
        filled_qty: u32,
        avg_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        if filled_qty == 0 || !(avg_price.is_finite() && avg_price > 0.0) {
            return Err(ExecutionError::BadInput(format!(
                "invalid fill: qty={filled_qty} price={avg_price}"
            )));
        }

        let mut inner = self.inner.lock();

        let position = inner
            .positions
            .get(&plan.symbol)
            .cloned()
            .ok_or_else(|| ExecutionError::NoPosition(plan.symbol.clone()))?;

        let filled = filled_qty.min(position.shares);
        let gross = f64::from(filled) * avg_price;
        let fees = compute_fees(plan.kind, gross, Side::Sell).total();
        let net_proceeds = gross - fees;
        let pnl = (avg_price - position.entry_price) * f64::from(filled) - fees;

        inner.cash += net_proceeds;
        inner.counters.total_trades += 1;
        inner.counters.sell_trades += 1;
        inner.counters.total_pnl += pnl;
        if pnl >= 0.0 {
            inner.counters.wins += 1;
        } else {
            inner.counters.losses += 1;
        }
        if pnl > inner.counters.best_trade {
            inner.counters.best_trade = pnl;
        }
        if pnl < inner.counters.worst_trade {
            inner.counters.worst_trade = pnl;
        }

        if filled == position.shares {
            inner.positions.remove(&plan.symbol);
            let cooldown = if plan.reason.is_stop_loss() {
                self.params.cooldown_stop_loss
            } else {
                self.params.cooldown_normal
            };
            let until = now
                + chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
            inner.cooldowns.insert(plan.symbol.clone(), until);
        } else if let Some(p) = inner.positions.get_mut(&plan.symbol) {
            p.shares -= filled;
        }

        let trade = Trade {
            timestamp: now,
            symbol: plan.symbol.clone(),
            side: Side::Sell,
            shares: filled,
            price: avg_price,
            fees,
            pnl: Some(pnl),
            mode: self.mode,
            confidence: position.confidence,
            sector: position.sector.clone(),
            cash_balance_after: inner.cash,
            atr: position.atr,
            trading_day: now.date_naive(),
            reason: Some(plan.reason.to_string()),
            transaction_id: plan.transaction_id.clone(),
        };

        info!(
            symbol = %trade.symbol,
            shares = trade.shares,
            price = trade.price,
            pnl,
            reason = %plan.reason,
            cash_after = trade.cash_balance_after,
            "sell executed"
        );

        Self::push_trade(&mut inner, trade.clone());
        Ok(trade)
    }

    /// Remove a position without any cash movement. Used only by startup
    /// reconciliation when the broker holds nothing behind the record.
    pub fn drop_position(&self, symbol: &str) -> Option<Position> {
        let mut inner = self.inner.lock();
        let dropped = inner.positions.remove(symbol);
        if dropped.is_some() {
            warn!(symbol, "position record dropped without settlement");
        }
        dropped
    }

    /// Check every position against its stop/target and ratchet trailing
    /// stops. Returns the exits to execute; ratchets are applied in place.
    pub fn update_risk_exits(&self, prices: &HashMap<String, f64>) -> Vec<ExitIntent> {
        let mut inner = self.inner.lock();
        let symbols: Vec<String> = inner.positions.keys().cloned().collect();
        let mut intents = Vec::new();

        for symbol in symbols {
            let Some(&price) = prices.get(&symbol) else {
                continue;
            };
            let Some(position) = inner.positions.get_mut(&symbol) else {
                continue;
            };
            if !(price.is_finite() && price > 0.0) {
                warn!(symbol = %symbol, price, "invalid mark — skipping risk check");
                continue;
            }

            if price <= position.stop_loss {
                let reason = if position.stop_loss > position.entry_price {
                    ExitReason::TrailingStop
                } else {
                    ExitReason::StopLoss
                };
                intents.push(ExitIntent {
                    symbol: symbol.clone(),
                    shares: position.shares,
                    reason,
                    ref_price: price,
                });
                continue;
            }

            if price >= position.take_profit {
                intents.push(ExitIntent {
                    symbol: symbol.clone(),
                    shares: position.shares,
                    reason: ExitReason::TakeProfit,
                    ref_price: price,
                });
                continue;
            }

            // Trailing ratchet: activates after the gain clears the
            // activation distance; the stop only ever moves up.
            if let Some(atr) = position.atr {
                if atr > 0.0 && price > position.entry_price {
                    let gain = price - position.entry_price;
                    if gain >= atr * self.params.trailing_activation_multiplier {
                        let trail = price - atr * self.params.trailing_stop_multiplier;
                        let floor = position.entry_price * BREAK_EVEN_MARGIN;
                        let new_stop = trail.max(floor);
                        if new_stop > position.stop_loss {
                            debug!(
                                symbol = %symbol,
                                old_stop = position.stop_loss,
                                new_stop,
                                price,
                                "trailing stop ratcheted"
                            );
                            position.stop_loss = new_stop;
                        }
                    }
                }
            }
        }

        intents
    }

    // -------------------------------------------------------------------------
    // Structured (multi-leg) groups
    // -------------------------------------------------------------------------

    pub fn register_structured(&self, group: StructuredGroup) {
        self.inner
            .lock()
            .structured
            .insert(group.transaction_id.clone(), group);
    }

    pub fn structured_groups(&self) -> Vec<StructuredGroup> {
        self.inner.lock().structured.values().cloned().collect()
    }

    /// Underlyings with at least one live structured group: a long leg still
    /// in the positions map, or a short leg not yet bought back.
    pub fn engaged_underlyings(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut out: Vec<String> = inner
            .structured
            .values()
            .filter(|g| Self::group_is_live(&inner, g))
            .map(|g| g.underlying.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Drop structured groups whose legs have all been closed.
    pub fn prune_structured(&self) {
        let mut inner = self.inner.lock();
        let live: Vec<String> = inner
            .structured
            .values()
            .filter(|g| Self::group_is_live(&inner, g))
            .map(|g| g.transaction_id.clone())
            .collect();
        inner.structured.retain(|id, _| live.contains(id));
    }

    fn group_is_live(inner: &Inner, group: &StructuredGroup) -> bool {
        group
            .long_leg_symbols()
            .any(|s| inner.positions.contains_key(s))
            || group.open_short_legs().next().is_some()
    }

    // -------------------------------------------------------------------------
    // Short option legs (sell-to-open / buy-to-close)
    // -------------------------------------------------------------------------

    /// Credit the premium of a sold option leg. The leg itself is tracked in
    /// the structured group registered by the composer.
    pub fn apply_short_open(
        &self,
        symbol: &str,
        qty: u32,
        premium: f64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        if qty == 0 || !(premium.is_finite() && premium > 0.0) {
            return Err(ExecutionError::BadInput(format!(
                "invalid short open: qty={qty} premium={premium}"
            )));
        }
        let mut inner = self.inner.lock();

        let gross = f64::from(qty) * premium;
        let fees = compute_fees(InstrumentKind::Option, gross, Side::Sell).total();
        inner.cash += gross - fees;
        inner.counters.total_trades += 1;
        inner.counters.sell_trades += 1;

        let trade = Trade {
            timestamp: now,
            symbol: symbol.to_string(),
            side: Side::Sell,
            shares: qty,
            price: premium,
            fees,
            pnl: None,
            mode: self.mode,
            confidence: 0.0,
            sector: "FNO".to_string(),
            cash_balance_after: inner.cash,
            atr: None,
            trading_day: now.date_naive(),
            reason: None,
            transaction_id: Some(transaction_id.to_string()),
        };

        info!(
            symbol,
            qty,
            premium,
            cash_after = trade.cash_balance_after,
            "short leg opened"
        );

        Self::push_trade(&mut inner, trade.clone());
        Ok(trade)
    }

    /// Buy back a sold leg, realising its PnL and marking it closed in the
    /// owning group.
    pub fn close_short_leg(
        &self,
        transaction_id: &str,
        symbol: &str,
        premium_now: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        if !(premium_now.is_finite() && premium_now >= 0.0) {
            return Err(ExecutionError::BadInput(format!(
                "invalid buyback premium {premium_now}"
            )));
        }
        let mut inner = self.inner.lock();

        let (qty, entry_premium) = {
            let group = inner
                .structured
                .get_mut(transaction_id)
                .ok_or_else(|| ExecutionError::NoPosition(transaction_id.to_string()))?;
            let leg = group
                .legs
                .iter_mut()
                .find(|l| l.symbol == symbol && l.side == Side::Sell && !l.closed)
                .ok_or_else(|| ExecutionError::NoPosition(symbol.to_string()))?;
            leg.closed = true;
            (leg.qty, leg.entry_premium)
        };

        let cost = f64::from(qty) * premium_now;
        let fees = compute_fees(InstrumentKind::Option, cost, Side::Buy).total();
        let pnl = (entry_premium - premium_now) * f64::from(qty) - fees;

        inner.cash -= cost + fees;
        inner.counters.total_trades += 1;
        inner.counters.buy_trades += 1;
        inner.counters.total_pnl += pnl;
        if pnl >= 0.0 {
            inner.counters.wins += 1;
        } else {
            inner.counters.losses += 1;
        }
        if pnl > inner.counters.best_trade {
            inner.counters.best_trade = pnl;
        }
        if pnl < inner.counters.worst_trade {
            inner.counters.worst_trade = pnl;
        }

        let trade = Trade {
            timestamp: now,
            symbol: symbol.to_string(),
            side: Side::Buy,
            shares: qty,
            price: premium_now,
            fees,
            pnl: Some(pnl),
            mode: self.mode,
            confidence: 0.0,
            sector: "FNO".to_string(),
            cash_balance_after: inner.cash,
            atr: None,
            trading_day: now.date_naive(),
            reason: Some(reason.to_string()),
            transaction_id: Some(transaction_id.to_string()),
        };

        info!(
            symbol,
            qty,
            premium_now,
            pnl,
            reason = %reason,
            "short leg bought back"
        );

        Self::push_trade(&mut inner, trade.clone());
        Ok(trade)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> PortfolioSnapshot {
        let inner = self.inner.lock();
        PortfolioSnapshot {
            initial_cash: self.initial_cash,
            cash: inner.cash,
            positions: inner
                .positions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            structured: inner
                .structured
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            counters: inner.counters.clone(),
            cooldowns: inner
                .cooldowns
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Restore from a snapshot; expired cooldowns are dropped.
    pub fn restore(&self, snapshot: PortfolioSnapshot, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.cash = snapshot.cash;
        inner.positions = snapshot.positions.into_iter().collect();
        inner.structured = snapshot.structured.into_iter().collect();
        inner.counters = snapshot.counters;
        inner.cooldowns = snapshot
            .cooldowns
            .into_iter()
            .filter(|(_, until)| *until > now)
            .collect();
        info!(
            cash = inner.cash,
            positions = inner.positions.len(),
            cooldowns = inner.cooldowns.len(),
            "portfolio restored from snapshot"
        );
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn push_trade(inner: &mut Inner, trade: Trade) {
        inner.trades.push_back(trade);
        while inner.trades.len() > TRADE_HISTORY_CAP {
            inner.trades.pop_front();
        }
    }
}

impl std::fmt::Debug for Portfolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Portfolio")
            .field("cash", &inner.cash)
            .field("positions", &inner.positions.len())
            .field("trades", &inner.trades.len())
            .field("mode", &self.mode)
            .finish()
    }
}
