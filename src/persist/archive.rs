// =============================================================================
// End-of-Day Archivist
// =============================================================================
//
// At market close, once per trading day:
//
//   1. Compose the DailySummary from the day's trades.
//   2. Write archive/summary_{day}.json and archive/state_{day}.json.
//   3. Write archive/trades_{day}_{mode}.json with metadata, summary,
//      portfolio state, the trade list, open positions, and a data-integrity
//      block (count, SHA-256 checksum, first/last timestamps).
//   4. Mirror the trio into trade_archives_backup/.
//
// Every field is derived from the day's data, so archiving the same day
// twice writes byte-identical files (checksum equality is the idempotence
// test).
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::PersistenceError;
use crate::persist::{atomic_write, StateManager};
use crate::portfolio::{Position, PortfolioSnapshot, StructuredGroup, Trade};
use crate::types::{Side, TradingMode};

/// One trading day in numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub trading_day: NaiveDate,
    pub total_trades: u64,
    pub buy_trades: u64,
    pub sell_trades: u64,
    pub winners: u64,
    pub losers: u64,
    pub total_pnl: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub opening_cash: f64,
    pub closing_cash: f64,
}

/// Audit block over the archived trade list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIntegrity {
    pub count: usize,
    pub checksum: String,
    pub first_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub last_ts: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub trading_day: NaiveDate,
    pub mode: TradingMode,
    pub engine_version: String,
}

/// The full per-day archive document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyArchive {
    pub metadata: ArchiveMetadata,
    pub daily_summary: DailySummary,
    pub portfolio_state: PortfolioSnapshot,
    pub trades: Vec<Trade>,
    pub open_positions: Vec<Position>,
    pub data_integrity: DataIntegrity,
}

/// Build the day's summary from its trade list.
pub fn compose_summary(
    trading_day: NaiveDate,
    trades: &[Trade],
    opening_cash: f64,
    closing_cash: f64,
) -> DailySummary {
    let mut summary = DailySummary {
        trading_day,
        total_trades: trades.len() as u64,
        buy_trades: 0,
        sell_trades: 0,
        winners: 0,
        losers: 0,
        total_pnl: 0.0,
        best_trade: 0.0,
        worst_trade: 0.0,
        opening_cash,
        closing_cash,
    };

    for trade in trades {
        match trade.side {
            Side::Buy => summary.buy_trades += 1,
            Side::Sell => summary.sell_trades += 1,
        }
        if let Some(pnl) = trade.pnl {
            summary.total_pnl += pnl;
            if pnl >= 0.0 {
                summary.winners += 1;
            } else {
                summary.losers += 1;
            }
            if pnl > summary.best_trade {
                summary.best_trade = pnl;
            }
            if pnl < summary.worst_trade {
                summary.worst_trade = pnl;
            }
        }
    }

    summary
}

/// SHA-256 over the canonical JSON encoding of the trade list.
pub fn checksum_trades(trades: &[Trade]) -> String {
    let canonical = serde_json::to_vec(trades).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Integrity block for the archive document.
pub fn integrity_for(trades: &[Trade]) -> DataIntegrity {
    DataIntegrity {
        count: trades.len(),
        checksum: checksum_trades(trades),
        first_ts: trades.first().map(|t| t.timestamp),
        last_ts: trades.last().map(|t| t.timestamp),
    }
}

impl StateManager {
    /// Write the full end-of-day archive set and its backup mirror.
    pub fn write_daily_archive(
        &self,
        day: NaiveDate,
        mode: TradingMode,
        summary: &DailySummary,
        portfolio_state: &PortfolioSnapshot,
        trades: &[Trade],
        open_positions: &[Position],
    ) -> Result<(), PersistenceError> {
        let day_str = day.format("%Y-%m-%d").to_string();

        let archive = DailyArchive {
            metadata: ArchiveMetadata {
                trading_day: day,
                mode,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            daily_summary: summary.clone(),
            portfolio_state: portfolio_state.clone(),
            trades: trades.to_vec(),
            open_positions: open_positions.to_vec(),
            data_integrity: integrity_for(trades),
        };

        let summary_bytes = serde_json::to_vec_pretty(summary)?;
        let state_bytes = serde_json::to_vec_pretty(portfolio_state)?;
        let archive_bytes = serde_json::to_vec_pretty(&archive)?;

        let files = [
            (format!("summary_{day_str}.json"), &summary_bytes),
            (format!("state_{day_str}.json"), &state_bytes),
            (format!("trades_{day_str}_{mode}.json"), &archive_bytes),
        ];

        for (name, bytes) in &files {
            atomic_write(&self.archive_dir().join(name), bytes)?;
        }
        for (name, bytes) in &files {
            atomic_write(&self.backup_dir().join(name), bytes)?;
        }

        info!(
            day = %day_str,
            trades = trades.len(),
            checksum = %archive.data_integrity.checksum,
            "daily archive written"
        );
        Ok(())
    }

    /// Write the next-day carry file for open structured F&O positions.
    pub fn write_fno_carry(
        &self,
        day: NaiveDate,
        groups: &[StructuredGroup],
    ) -> Result<(), PersistenceError> {
        let path = self
            .saved_trades_dir()
            .join(format!("fno_positions_{}.json", day.format("%Y-%m-%d")));
        let bytes = serde_json::to_vec_pretty(groups)?;
        atomic_write(&path, &bytes)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    use crate::portfolio::PortfolioCounters;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn trade(symbol: &str, side: Side, pnl: Option<f64>, minute: u32) -> Trade {
        Trade {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 10, minute, 0).unwrap(),
            symbol: symbol.to_string(),
            side,
            shares: 10,
            price: 100.0,
            fees: 1.0,
            pnl,
            mode: TradingMode::Paper,
            confidence: 0.5,
            sector: "IT".to_string(),
            cash_balance_after: 999_000.0,
            atr: None,
            trading_day: day(),
            reason: None,
            transaction_id: None,
        }
    }

    fn snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot {
            initial_cash: 1_000_000.0,
            cash: 1_001_500.0,
            positions: BTreeMap::new(),
            structured: BTreeMap::new(),
            counters: PortfolioCounters::default(),
            cooldowns: BTreeMap::new(),
        }
    }

    #[test]
    fn summary_tallies_sides_and_pnl() {
        let trades = vec![
            trade("AAA", Side::Buy, None, 0),
            trade("AAA", Side::Sell, Some(500.0), 30),
            trade("BBB", Side::Buy, None, 31),
            trade("BBB", Side::Sell, Some(-200.0), 45),
        ];
        let summary = compose_summary(day(), &trades, 1_000_000.0, 1_000_300.0);
        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.buy_trades, 2);
        assert_eq!(summary.sell_trades, 2);
        assert_eq!(summary.winners, 1);
        assert_eq!(summary.losers, 1);
        assert!((summary.total_pnl - 300.0).abs() < 1e-10);
        assert!((summary.best_trade - 500.0).abs() < 1e-10);
        assert!((summary.worst_trade + 200.0).abs() < 1e-10);
    }

    #[test]
    fn empty_day_summary_is_zeroed() {
        let summary = compose_summary(day(), &[], 1_000_000.0, 1_000_000.0);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.total_pnl, 0.0);
        assert_eq!(summary.best_trade, 0.0);
    }

    #[test]
    fn checksum_is_deterministic_and_order_sensitive() {
        let a = vec![trade("AAA", Side::Buy, None, 0), trade("BBB", Side::Buy, None, 1)];
        let b = vec![trade("BBB", Side::Buy, None, 1), trade("AAA", Side::Buy, None, 0)];
        assert_eq!(checksum_trades(&a), checksum_trades(&a));
        assert_ne!(checksum_trades(&a), checksum_trades(&b));
        assert_eq!(checksum_trades(&a).len(), 64);
    }

    #[test]
    fn archive_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();

        let trades = vec![
            trade("AAA", Side::Buy, None, 0),
            trade("AAA", Side::Sell, Some(500.0), 30),
        ];
        let summary = compose_summary(day(), &trades, 1_000_000.0, 1_000_500.0);
        let snap = snapshot();

        manager
            .write_daily_archive(day(), TradingMode::Paper, &summary, &snap, &trades, &[])
            .unwrap();
        let archive_path = dir
            .path()
            .join("state/archive/trades_2025-08-01_paper.json");
        let first = std::fs::read(&archive_path).unwrap();

        // Running the archive again for the same day writes identical bytes.
        manager
            .write_daily_archive(day(), TradingMode::Paper, &summary, &snap, &trades, &[])
            .unwrap();
        let second = std::fs::read(&archive_path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn archive_trio_and_backup_mirror_exist() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();
        let trades = vec![trade("AAA", Side::Buy, None, 0)];
        let summary = compose_summary(day(), &trades, 1_000_000.0, 999_000.0);

        manager
            .write_daily_archive(day(), TradingMode::Paper, &summary, &snapshot(), &trades, &[])
            .unwrap();

        for base in [dir.path().join("state/archive"), dir.path().join("trade_archives_backup")] {
            assert!(base.join("summary_2025-08-01.json").exists());
            assert!(base.join("state_2025-08-01.json").exists());
            assert!(base.join("trades_2025-08-01_paper.json").exists());
        }
    }

    #[test]
    fn archive_document_carries_integrity_block() {
        let trades = vec![
            trade("AAA", Side::Buy, None, 0),
            trade("AAA", Side::Sell, Some(1.0), 30),
        ];
        let integrity = integrity_for(&trades);
        assert_eq!(integrity.count, 2);
        assert_eq!(integrity.first_ts, Some(trades[0].timestamp));
        assert_eq!(integrity.last_ts, Some(trades[1].timestamp));
        assert_eq!(integrity.checksum, checksum_trades(&trades));
    }

    #[test]
    fn fno_carry_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();

        let groups = vec![StructuredGroup {
            transaction_id: "txn-1".to_string(),
            underlying: "NIFTY".to_string(),
            strategy: "iron_condor".to_string(),
            legs: Vec::new(),
            created_at: Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap(),
        }];
        manager.write_fno_carry(day(), &groups).unwrap();

        let path = dir.path().join("saved_trades/fno_positions_2025-08-01.json");
        let content = std::fs::read_to_string(path).unwrap();
        let decoded: Vec<StructuredGroup> = serde_json::from_str(&content).unwrap();
        assert_eq!(decoded, groups);
    }
}
