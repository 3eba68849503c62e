// =============================================================================
// Market Calendar — IST trading hours and the session phase machine
// =============================================================================
//
// NSE/BSE cash and derivatives sessions run 09:15–15:30 IST on weekdays.
// The phase machine adds a pre-open window (09:00–09:15), a closing window
// (last 20 minutes, entries suppressed), and a one-hour after-close window in
// which the end-of-day unwind may still run.
//
// Holidays are supplied by configuration; a date present in the holiday set
// is treated exactly like a weekend.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Session phase the scheduler gates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPhase {
    /// Outside session hours or a non-trading day: sleep, persist, no trades.
    Closed,
    /// 09:00–09:15: scan but place no orders.
    PreOpen,
    /// 09:15 until 20 minutes before close: full pipeline.
    Open,
    /// Final 20 minutes: entries suppressed, exits enforced.
    Closing,
    /// 15:30–16:30: one-shot unwind window.
    AfterClose,
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "market_closed"),
            Self::PreOpen => write!(f, "pre_open"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::AfterClose => write!(f, "after_close"),
        }
    }
}

/// Minutes before close at which the closing window begins.
const CLOSING_WINDOW_MINUTES: i64 = 20;

/// Trading-day calendar with an injected holiday set.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    holidays: HashSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Convert an arbitrary UTC instant to IST.
    pub fn to_ist(utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&Kolkata)
    }

    pub fn session_open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).expect("valid time")
    }

    pub fn session_close() -> NaiveTime {
        NaiveTime::from_hms_opt(15, 30, 0).expect("valid time")
    }

    /// Weekday and not a configured holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// The trading day an instant belongs to (its IST calendar date).
    pub fn trading_day(now: DateTime<Tz>) -> NaiveDate {
        now.date_naive()
    }

    /// Signed minutes until session close; negative once the close has
    /// passed. `None` on non-trading days.
    pub fn minutes_to_close(&self, now: DateTime<Tz>) -> Option<i64> {
        let date = now.date_naive();
        if !self.is_trading_day(date) {
            return None;
        }
        let close = Kolkata
            .from_local_datetime(&date.and_time(Self::session_close()))
            .single()?;
        Some((close - now).num_seconds().div_euclid(60))
    }

    /// Classify an instant into the session phase machine.
    pub fn phase(&self, now: DateTime<Tz>) -> MarketPhase {
        let date = now.date_naive();
        if !self.is_trading_day(date) {
            return MarketPhase::Closed;
        }

        let t = now.time();
        let pre_open = NaiveTime::from_hms_opt(9, 0, 0).expect("valid time");
        let open = Self::session_open();
        let close = Self::session_close();
        let closing_start = close - chrono::Duration::minutes(CLOSING_WINDOW_MINUTES);
        let after_close_end = NaiveTime::from_hms_opt(16, 30, 0).expect("valid time");

        if t < pre_open {
            MarketPhase::Closed
        } else if t < open {
            MarketPhase::PreOpen
        } else if t < closing_start {
            MarketPhase::Open
        } else if t < close {
            MarketPhase::Closing
        } else if t < after_close_end {
            MarketPhase::AfterClose
        } else {
            MarketPhase::Closed
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> MarketCalendar {
        MarketCalendar::new([NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()]) // Independence Day
    }

    fn ist(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Tz> {
        Kolkata
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn weekend_is_closed() {
        // 2025-08-02 is a Saturday.
        assert!(!cal().is_trading_day(NaiveDate::from_ymd_opt(2025, 8, 2).unwrap()));
        assert_eq!(cal().phase(ist(2025, 8, 2, 11, 0)), MarketPhase::Closed);
    }

    #[test]
    fn holiday_is_closed() {
        // 2025-08-15 is a Friday but configured as a holiday.
        assert!(!cal().is_trading_day(NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()));
        assert_eq!(cal().phase(ist(2025, 8, 15, 11, 0)), MarketPhase::Closed);
    }

    #[test]
    fn phase_transitions_across_the_day() {
        let c = cal();
        // 2025-08-01 is a Friday (trading day).
        assert_eq!(c.phase(ist(2025, 8, 1, 8, 59)), MarketPhase::Closed);
        assert_eq!(c.phase(ist(2025, 8, 1, 9, 0)), MarketPhase::PreOpen);
        assert_eq!(c.phase(ist(2025, 8, 1, 9, 14)), MarketPhase::PreOpen);
        assert_eq!(c.phase(ist(2025, 8, 1, 9, 15)), MarketPhase::Open);
        assert_eq!(c.phase(ist(2025, 8, 1, 15, 9)), MarketPhase::Open);
        assert_eq!(c.phase(ist(2025, 8, 1, 15, 10)), MarketPhase::Closing);
        assert_eq!(c.phase(ist(2025, 8, 1, 15, 29)), MarketPhase::Closing);
        assert_eq!(c.phase(ist(2025, 8, 1, 15, 30)), MarketPhase::AfterClose);
        assert_eq!(c.phase(ist(2025, 8, 1, 16, 29)), MarketPhase::AfterClose);
        assert_eq!(c.phase(ist(2025, 8, 1, 16, 30)), MarketPhase::Closed);
    }

    #[test]
    fn minutes_to_close_signed() {
        let c = cal();
        assert_eq!(c.minutes_to_close(ist(2025, 8, 1, 15, 0)), Some(30));
        assert_eq!(c.minutes_to_close(ist(2025, 8, 1, 15, 30)), Some(0));
        assert_eq!(c.minutes_to_close(ist(2025, 8, 1, 16, 0)), Some(-30));
        // Weekend: no session, no countdown.
        assert_eq!(c.minutes_to_close(ist(2025, 8, 2, 15, 0)), None);
    }

    #[test]
    fn trading_day_is_ist_date() {
        let now = ist(2025, 8, 1, 10, 0);
        assert_eq!(
            MarketCalendar::trading_day(now),
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
        );
    }
}
