// =============================================================================
// Option Contract Construction — expiries, strikes, and structure legs
// =============================================================================
//
// Expiry: the nearest weekly expiry at least `min_days_ahead` days out (else
// the following week), on the index's expiry weekday.
//
// Strikes: ATM is the spot rounded to the strike grid; strangle/condor wings
// sit at ATM ± k·σ·√T rounded to the grid (σ·√T arrives here already in
// index points, derived from the daily ATR).
// =============================================================================

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::fno::characteristics::IndexCharacteristics;
use crate::types::{OptionContract, OptionRight, Side};

/// Structured option strategies the composer can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FnoStrategyKind {
    LongCall,
    LongPut,
    BullCallSpread,
    BearPutSpread,
    LongStraddle,
    ShortStrangle,
    IronCondor,
}

impl std::fmt::Display for FnoStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LongCall => "long_call",
            Self::LongPut => "long_put",
            Self::BullCallSpread => "bull_call_spread",
            Self::BearPutSpread => "bear_put_spread",
            Self::LongStraddle => "long_straddle",
            Self::ShortStrangle => "short_strangle",
            Self::IronCondor => "iron_condor",
        };
        write!(f, "{s}")
    }
}

/// One leg of a planned structure, before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedLeg {
    pub contract: OptionContract,
    pub side: Side,
    /// Quantity in units (lots x lot_size).
    pub qty: u32,
}

/// A fully constructed structure ready for the max-loss check and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructurePlan {
    pub kind: FnoStrategyKind,
    pub underlying: String,
    pub legs: Vec<PlannedLeg>,
    pub lot_size: u32,
    /// Wing distance in index points (zero for single-strike structures).
    pub wing_width: f64,
    /// σ·√T in index points, as used for strike placement.
    pub sigma_points: f64,
}

/// Nearest expiry on `weekday` at least `min_days_ahead` days after `today`;
/// otherwise the following week's.
pub fn next_weekly_expiry(today: NaiveDate, weekday: chrono::Weekday, min_days_ahead: i64) -> NaiveDate {
    let today_num = today.weekday().num_days_from_monday() as i64;
    let target_num = weekday.num_days_from_monday() as i64;
    let mut days_until = (target_num - today_num).rem_euclid(7);
    if days_until < min_days_ahead {
        days_until += 7;
    }
    today + Duration::days(days_until)
}

/// Round `spot` to the nearest strike on the grid.
pub fn round_to_strike(spot: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return spot;
    }
    (spot / step).round() * step
}

/// Wing offset in points: k·σ·√T rounded to the grid, never below one step.
pub fn wing_offset(sigma_points: f64, sigma_k: f64, step: f64) -> f64 {
    let raw = sigma_points * sigma_k;
    round_to_strike(raw, step).max(step)
}

/// Construct the legs for `kind` around the current spot.
///
/// `sigma_points` is σ·√T expressed in index points. Quantity per leg is one
/// lot; the composer scales lots after the max-loss check.
pub fn build_structure(
    kind: FnoStrategyKind,
    index: &IndexCharacteristics,
    spot: f64,
    sigma_points: f64,
    sigma_k: f64,
    expiry: NaiveDate,
) -> StructurePlan {
    let step = index.strike_step;
    let atm = round_to_strike(spot, step);
    let wing = wing_offset(sigma_points, sigma_k, step);
    let qty = index.lot_size;

    let contract = |strike: f64, right: OptionRight| OptionContract {
        underlying: index.symbol.clone(),
        expiry,
        strike,
        right,
        exchange: index.exchange,
    };
    let leg = |strike: f64, right: OptionRight, side: Side| PlannedLeg {
        contract: contract(strike, right),
        side,
        qty,
    };

    let legs = match kind {
        FnoStrategyKind::LongCall => vec![leg(atm, OptionRight::CE, Side::Buy)],
        FnoStrategyKind::LongPut => vec![leg(atm, OptionRight::PE, Side::Buy)],
        FnoStrategyKind::BullCallSpread => vec![
            leg(atm, OptionRight::CE, Side::Buy),
            leg(atm + wing, OptionRight::CE, Side::Sell),
        ],
        FnoStrategyKind::BearPutSpread => vec![
            leg(atm, OptionRight::PE, Side::Buy),
            leg(atm - wing, OptionRight::PE, Side::Sell),
        ],
        FnoStrategyKind::LongStraddle => vec![
            leg(atm, OptionRight::CE, Side::Buy),
            leg(atm, OptionRight::PE, Side::Buy),
        ],
        FnoStrategyKind::ShortStrangle => vec![
            leg(atm + wing, OptionRight::CE, Side::Sell),
            leg(atm - wing, OptionRight::PE, Side::Sell),
        ],
        FnoStrategyKind::IronCondor => vec![
            leg(atm + wing, OptionRight::CE, Side::Sell),
            leg(atm + 2.0 * wing, OptionRight::CE, Side::Buy),
            leg(atm - wing, OptionRight::PE, Side::Sell),
            leg(atm - 2.0 * wing, OptionRight::PE, Side::Buy),
        ],
    };

    StructurePlan {
        kind,
        underlying: index.symbol.clone(),
        legs,
        lot_size: index.lot_size,
        wing_width: wing,
        sigma_points,
    }
}

/// Worst-case loss of the structure given per-leg premiums (same order as
/// `plan.legs`), in rupees for the planned quantity.
///
/// - Net-debit structures (long call/put/straddle): the debit itself.
/// - Defined spreads (bull call, bear put, condor): spread width minus net
///   credit (or plus net debit), floored at the net debit for debit spreads.
/// - Short strangle: undefined risk; the index margin stands in as the
///   capital at risk.
pub fn worst_case_loss(
    plan: &StructurePlan,
    premiums: &[f64],
    index: &IndexCharacteristics,
) -> Option<f64> {
    if premiums.len() != plan.legs.len() {
        return None;
    }
    if premiums.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return None;
    }

    let qty = f64::from(plan.legs.first()?.qty);

    // Net debit: positive = we pay.
    let net_debit: f64 = plan
        .legs
        .iter()
        .zip(premiums)
        .map(|(leg, &premium)| match leg.side {
            Side::Buy => premium,
            Side::Sell => -premium,
        })
        .sum();

    let loss = match plan.kind {
        FnoStrategyKind::LongCall
        | FnoStrategyKind::LongPut
        | FnoStrategyKind::LongStraddle => net_debit * qty * index.point_value,
        FnoStrategyKind::BullCallSpread | FnoStrategyKind::BearPutSpread => {
            // Debit spread: the debit is the max loss.
            net_debit * qty * index.point_value
        }
        FnoStrategyKind::IronCondor => {
            // Credit structure: wing width minus the credit received.
            (plan.wing_width + net_debit) * qty * index.point_value
        }
        FnoStrategyKind::ShortStrangle => {
            // Undefined risk: the exchange margin (already in rupees) stands
            // in as the capital at risk.
            let lots = qty / f64::from(index.lot_size.max(1));
            index.margin_per_lot * lots
        }
    };

    (loss.is_finite() && loss > 0.0).then_some(loss)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fno::characteristics::default_index_table;
    use chrono::Weekday;

    fn nifty() -> IndexCharacteristics {
        default_index_table()
            .into_iter()
            .find(|c| c.symbol == "NIFTY")
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expiry_skips_too_near_weeklies() {
        // 2025-08-05 is a Tuesday; Thursday 2025-08-07 is 2 days out — allowed
        // at min_days_ahead = 2.
        let expiry = next_weekly_expiry(date(2025, 8, 5), Weekday::Thu, 2);
        assert_eq!(expiry, date(2025, 8, 7));

        // From Wednesday the 6th, Thursday is 1 day out — rolls a week.
        let expiry = next_weekly_expiry(date(2025, 8, 6), Weekday::Thu, 2);
        assert_eq!(expiry, date(2025, 8, 14));

        // On the expiry day itself, roll to next week.
        let expiry = next_weekly_expiry(date(2025, 8, 7), Weekday::Thu, 2);
        assert_eq!(expiry, date(2025, 8, 14));
    }

    #[test]
    fn strikes_snap_to_grid() {
        assert_eq!(round_to_strike(24_513.0, 50.0), 24_500.0);
        assert_eq!(round_to_strike(24_532.0, 50.0), 24_550.0);
        assert_eq!(round_to_strike(24_525.0, 50.0), 24_550.0); // round half up
    }

    #[test]
    fn wing_offset_has_step_floor() {
        assert_eq!(wing_offset(10.0, 1.0, 50.0), 50.0);
        assert_eq!(wing_offset(230.0, 1.0, 50.0), 250.0);
    }

    #[test]
    fn straddle_has_two_atm_buy_legs() {
        let plan = build_structure(
            FnoStrategyKind::LongStraddle,
            &nifty(),
            24_513.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        assert_eq!(plan.legs.len(), 2);
        assert!(plan.legs.iter().all(|l| l.side == Side::Buy));
        assert!(plan.legs.iter().all(|l| (l.contract.strike - 24_500.0).abs() < 1e-9));
        assert_eq!(plan.legs[0].contract.right, OptionRight::CE);
        assert_eq!(plan.legs[1].contract.right, OptionRight::PE);
        assert_eq!(plan.legs[0].qty, 75);
    }

    #[test]
    fn condor_has_four_legs_wings_bought() {
        let plan = build_structure(
            FnoStrategyKind::IronCondor,
            &nifty(),
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        assert_eq!(plan.legs.len(), 4);
        let sells: Vec<_> = plan.legs.iter().filter(|l| l.side == Side::Sell).collect();
        let buys: Vec<_> = plan.legs.iter().filter(|l| l.side == Side::Buy).collect();
        assert_eq!(sells.len(), 2);
        assert_eq!(buys.len(), 2);
        // Wings sit beyond the body.
        let body_call = sells.iter().find(|l| l.contract.right == OptionRight::CE).unwrap();
        let wing_call = buys.iter().find(|l| l.contract.right == OptionRight::CE).unwrap();
        assert!(wing_call.contract.strike > body_call.contract.strike);
    }

    #[test]
    fn straddle_worst_case_is_the_debit() {
        let plan = build_structure(
            FnoStrategyKind::LongStraddle,
            &nifty(),
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        let loss = worst_case_loss(&plan, &[150.0, 140.0], &nifty()).unwrap();
        assert!((loss - 290.0 * 75.0).abs() < 1e-6);
    }

    #[test]
    fn condor_worst_case_is_width_minus_credit() {
        let plan = build_structure(
            FnoStrategyKind::IronCondor,
            &nifty(),
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        // Sell body at 80/75, buy wings at 30/25: credit = 100/unit.
        let loss = worst_case_loss(&plan, &[80.0, 30.0, 75.0, 25.0], &nifty()).unwrap();
        let expected = (plan.wing_width - 100.0) * 75.0;
        assert!((loss - expected).abs() < 1e-6, "loss={loss} expected={expected}");
    }

    #[test]
    fn point_value_scales_debit_losses_too() {
        let mut scaled = nifty();
        scaled.point_value = 2.5;
        let plan = build_structure(
            FnoStrategyKind::LongStraddle,
            &scaled,
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        let loss = worst_case_loss(&plan, &[150.0, 140.0], &scaled).unwrap();
        assert!((loss - 290.0 * 75.0 * 2.5).abs() < 1e-6);

        let spread = build_structure(
            FnoStrategyKind::BullCallSpread,
            &scaled,
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        // Buy at 150, sell the wing at 60: debit 90 per unit.
        let loss = worst_case_loss(&spread, &[150.0, 60.0], &scaled).unwrap();
        assert!((loss - 90.0 * 75.0 * 2.5).abs() < 1e-6);
    }

    #[test]
    fn zero_or_bad_premiums_are_rejected() {
        let plan = build_structure(
            FnoStrategyKind::LongCall,
            &nifty(),
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        assert!(worst_case_loss(&plan, &[0.0], &nifty()).is_none());
        assert!(worst_case_loss(&plan, &[f64::NAN], &nifty()).is_none());
        assert!(worst_case_loss(&plan, &[], &nifty()).is_none());
    }

    #[test]
    fn strangle_uses_margin_proxy() {
        let plan = build_structure(
            FnoStrategyKind::ShortStrangle,
            &nifty(),
            24_500.0,
            200.0,
            1.0,
            date(2025, 8, 7),
        );
        let loss = worst_case_loss(&plan, &[60.0, 55.0], &nifty()).unwrap();
        assert!((loss - 120_000.0).abs() < 1e-6);
    }
}
