// =============================================================================
// State Manager — crash-safe snapshots and append-only trade logs
// =============================================================================
//
// Snapshot writes follow the atomic pattern:
//
//   write data -> path.tmp ; fsync
//   if exists(path): copy path -> path.backup
//   rename(path.tmp -> path)        (atomic on POSIX)
//
// Reads recover through the backup: a corrupt or missing primary falls back
// to `path.backup`, and failing that the caller gets `None` and starts from
// defaults. Trade records append one JSON line per trade to the day's file;
// O_APPEND keeps concurrent appends line-atomic on POSIX.
// =============================================================================

pub mod archive;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::portfolio::{PortfolioSnapshot, Trade};
use crate::types::TradingMode;

/// Durable scheduler state, overwritten at the end of every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub mode: TradingMode,
    pub iteration: u64,
    pub trading_day: NaiveDate,
    pub last_update: DateTime<Utc>,
    pub portfolio_snapshot: PortfolioSnapshot,
    pub last_prices: BTreeMap<String, f64>,
    pub total_value: f64,
    #[serde(default)]
    pub last_archive_day: Option<NaiveDate>,
    #[serde(default)]
    pub day_close_executed: Option<NaiveDate>,
}

/// Owns the on-disk layout: `state/` (snapshot + archive), `trades/` JSONL,
/// `saved_trades/` carry files, and the archive backup mirror.
pub struct StateManager {
    state_dir: PathBuf,
    trades_dir: PathBuf,
    archive_dir: PathBuf,
    backup_dir: PathBuf,
    saved_trades_dir: PathBuf,
}

impl StateManager {
    pub fn new(
        state_dir: impl Into<PathBuf>,
        trades_dir: impl Into<PathBuf>,
    ) -> Result<Self, PersistenceError> {
        let state_dir = state_dir.into();
        let trades_dir = trades_dir.into();
        let base = state_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let manager = Self {
            archive_dir: state_dir.join("archive"),
            backup_dir: base.join("trade_archives_backup"),
            saved_trades_dir: base.join("saved_trades"),
            state_dir,
            trades_dir,
        };

        for dir in [
            &manager.state_dir,
            &manager.trades_dir,
            &manager.archive_dir,
            &manager.backup_dir,
            &manager.saved_trades_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Write {
                path: dir.display().to_string(),
                source,
            })?;
        }

        Ok(manager)
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn saved_trades_dir(&self) -> &Path {
        &self.saved_trades_dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("current_state.json")
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    /// Atomically persist the scheduler state.
    pub fn write_snapshot(&self, state: &SchedulerState) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.snapshot_path(), &bytes)
    }

    /// Read the scheduler state, recovering through the backup copy.
    pub fn read_snapshot(&self) -> Option<SchedulerState> {
        read_with_recovery(&self.snapshot_path())
    }

    // -------------------------------------------------------------------------
    // Trade log
    // -------------------------------------------------------------------------

    fn trades_path(&self, day: NaiveDate) -> PathBuf {
        self.trades_dir
            .join(format!("trades_{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Append one trade to the day's JSONL file.
    pub fn append_trade(&self, trade: &Trade) -> Result<(), PersistenceError> {
        let path = self.trades_path(trade.trading_day);
        let line = serde_json::to_string(trade)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Write {
                path: path.display().to_string(),
                source,
            })?;

        writeln!(file, "{line}").map_err(|source| PersistenceError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read back the day's trade log (tolerates a torn final line).
    pub fn read_trades(&self, day: NaiveDate) -> Vec<Trade> {
        let path = self.trades_path(day);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(trade) => Some(trade),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable trade line");
                    None
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Free helpers (shared with the archivist)
// ---------------------------------------------------------------------------

/// tmp + fsync + backup + rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let to_err = |source: std::io::Error| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };

    let tmp_path = tmp_sibling(path, "tmp");

    let mut file = File::create(&tmp_path).map_err(to_err)?;
    file.write_all(bytes).map_err(to_err)?;
    file.sync_all().map_err(to_err)?;
    drop(file);

    if path.exists() {
        let backup = tmp_sibling(path, "backup");
        std::fs::copy(path, &backup).map_err(to_err)?;
    }

    std::fs::rename(&tmp_path, path).map_err(to_err)
}

/// Parse `path`; on corruption or absence fall back to `path.backup`.
pub fn read_with_recovery<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match try_read(path) {
        Some(value) => Some(value),
        None => {
            let backup = tmp_sibling(path, "backup");
            let recovered = try_read(&backup);
            if recovered.is_some() {
                info!(path = %path.display(), "primary unreadable — recovered from backup");
            }
            recovered
        }
    }
}

fn try_read<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable state file");
            None
        }
    }
}

fn tmp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PortfolioCounters;
    use chrono::TimeZone;

    fn state(iteration: u64) -> SchedulerState {
        SchedulerState {
            mode: TradingMode::Paper,
            iteration,
            trading_day: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            last_update: Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap(),
            portfolio_snapshot: PortfolioSnapshot {
                initial_cash: 1_000_000.0,
                cash: 987_000.0,
                positions: BTreeMap::new(),
                structured: BTreeMap::new(),
                counters: PortfolioCounters::default(),
                cooldowns: BTreeMap::new(),
            },
            last_prices: BTreeMap::from([("TCS".to_string(), 3_500.0)]),
            total_value: 1_000_123.0,
            last_archive_day: None,
            day_close_executed: None,
        }
    }

    fn trade(day: NaiveDate, symbol: &str) -> Trade {
        Trade {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            side: crate::types::Side::Buy,
            shares: 10,
            price: 100.0,
            fees: 1.0,
            pnl: None,
            mode: TradingMode::Paper,
            confidence: 0.5,
            sector: "IT".to_string(),
            cash_balance_after: 999_000.0,
            atr: None,
            trading_day: day,
            reason: None,
            transaction_id: None,
        }
    }

    #[test]
    fn layout_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let manager =
            StateManager::new(base.join("state"), base.join("trades")).unwrap();
        assert!(base.join("state/archive").is_dir());
        assert!(base.join("trades").is_dir());
        assert!(base.join("saved_trades").is_dir());
        assert!(base.join("trade_archives_backup").is_dir());
        assert_eq!(manager.saved_trades_dir(), base.join("saved_trades"));
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();

        let s = state(7);
        manager.write_snapshot(&s).unwrap();
        let restored = manager.read_snapshot().unwrap();
        assert_eq!(s, restored);
    }

    #[test]
    fn overwrite_keeps_backup_for_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();

        manager.write_snapshot(&state(1)).unwrap();
        manager.write_snapshot(&state(2)).unwrap();

        // Corrupt the primary; the backup (iteration 1) must recover.
        let path = dir.path().join("state/current_state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let recovered = manager.read_snapshot().unwrap();
        assert_eq!(recovered.iteration, 1);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();
        assert!(manager.read_snapshot().is_none());
    }

    #[test]
    fn atomic_write_reads_back_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");
        // No stray tmp file remains.
        assert!(!dir.path().join("x.json.tmp").exists());
    }

    #[test]
    fn trade_log_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        manager.append_trade(&trade(day, "AAA")).unwrap();
        manager.append_trade(&trade(day, "BBB")).unwrap();
        manager.append_trade(&trade(day, "CCC")).unwrap();

        let trades = manager.read_trades(day);
        assert_eq!(trades.len(), 3);
        let symbols: Vec<&str> = trades.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, ["AAA", "BBB", "CCC"]);

        // Timestamps are monotonically non-decreasing within the file.
        for pair in trades.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn trade_log_tolerates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        manager.append_trade(&trade(day, "AAA")).unwrap();

        // Simulate a crash mid-append.
        let path = dir.path().join("trades/trades_2025-08-01.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"symbol\":\"torn").unwrap();

        let trades = manager.read_trades(day);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "AAA");
    }

    #[test]
    fn separate_days_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            StateManager::new(dir.path().join("state"), dir.path().join("trades")).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
        manager.append_trade(&trade(d1, "AAA")).unwrap();
        manager.append_trade(&trade(d2, "BBB")).unwrap();

        assert_eq!(manager.read_trades(d1).len(), 1);
        assert_eq!(manager.read_trades(d2).len(), 1);
        assert!(dir.path().join("trades/trades_2025-08-01.jsonl").exists());
        assert!(dir.path().join("trades/trades_2025-08-04.jsonl").exists());
    }
}
