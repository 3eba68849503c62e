// =============================================================================
// Engine Configuration — flat, validated once at startup, atomically saved
// =============================================================================
//
// Every tunable parameter of the engine lives here. All fields carry
// `#[serde(default = "...")]` so that adding new fields never breaks loading
// an older config file. Persistence uses the tmp + rename pattern to prevent
// corruption on crash.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "RELIANCE".to_string(),
        "TCS".to_string(),
        "HDFCBANK".to_string(),
        "INFY".to_string(),
        "ICICIBANK".to_string(),
        "SBIN".to_string(),
        "BHARTIARTL".to_string(),
        "ITC".to_string(),
        "LT".to_string(),
        "AXISBANK".to_string(),
    ]
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_max_positions() -> usize {
    25
}

fn default_risk_per_trade_pct() -> f64 {
    0.015
}

fn default_atr_stop_multiplier() -> f64 {
    1.8
}

fn default_atr_target_multiplier() -> f64 {
    4.5
}

fn default_trailing_activation_multiplier() -> f64 {
    1.3
}

fn default_trailing_stop_multiplier() -> f64 {
    0.7
}

fn default_min_confidence_entry() -> f64 {
    0.45
}

fn default_min_confidence_exit() -> f64 {
    0.25
}

fn default_agreement_threshold_entry() -> f64 {
    0.4
}

fn default_agreement_threshold_exit() -> f64 {
    0.25
}

fn default_cooldown_normal_secs() -> u64 {
    15 * 60
}

fn default_cooldown_stop_loss_secs() -> u64 {
    30 * 60
}

fn default_min_holding_period_secs() -> u64 {
    15 * 60
}

fn default_max_per_second() -> usize {
    3
}

fn default_max_per_minute() -> usize {
    60
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout_secs() -> u64 {
    60
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_off_hours_interval_secs() -> u64 {
    300
}

fn default_correlation_block_threshold() -> f64 {
    0.9
}

fn default_max_position_value() -> f64 {
    150_000.0
}

fn default_batch_size() -> usize {
    10
}

fn default_inter_batch_delay_ms() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    45
}

fn default_order_status_budget_secs() -> u64 {
    30
}

fn default_max_trade_risk_pct() -> f64 {
    0.03
}

fn default_min_fno_confidence() -> f64 {
    0.55
}

fn default_strangle_sigma_k() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_trades_dir() -> String {
    "trades".to_string()
}

fn default_sl_fallback_pct() -> f64 {
    0.02
}

fn default_tp_fallback_pct() -> f64 {
    0.05
}

fn default_telemetry_queue_capacity() -> usize {
    1000
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the engine.
///
/// Constructed from file + environment overrides, validated in one place at
/// startup. Invalid config is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// paper / live / backtest.
    #[serde(default)]
    pub mode: TradingMode,

    /// Equity symbols the scan loop watches.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Starting cash.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// Simultaneous position cap.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Fraction of cash at risk per entry.
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,

    /// Stop distance in ATRs.
    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,

    /// Target distance in ATRs.
    #[serde(default = "default_atr_target_multiplier")]
    pub atr_target_multiplier: f64,

    /// Gain in ATRs required before the trailing stop activates.
    #[serde(default = "default_trailing_activation_multiplier")]
    pub trailing_activation_multiplier: f64,

    /// Trail distance in ATRs from the current price once active.
    #[serde(default = "default_trailing_stop_multiplier")]
    pub trailing_stop_multiplier: f64,

    /// Fallback stop-loss percentage when no ATR is available.
    #[serde(default = "default_sl_fallback_pct")]
    pub sl_fallback_pct: f64,

    /// Fallback take-profit percentage when no ATR is available.
    #[serde(default = "default_tp_fallback_pct")]
    pub tp_fallback_pct: f64,

    /// Minimum aggregated confidence for new entries.
    #[serde(default = "default_min_confidence_entry")]
    pub min_confidence_entry: f64,

    /// Lower confidence threshold for exit signals on existing positions.
    #[serde(default = "default_min_confidence_exit")]
    pub min_confidence_exit: f64,

    /// Strategy-agreement fraction required for entries.
    #[serde(default = "default_agreement_threshold_entry")]
    pub agreement_threshold_entry: f64,

    /// Strategy-agreement fraction for exits.
    #[serde(default = "default_agreement_threshold_exit")]
    pub agreement_threshold_exit: f64,

    /// Post-exit cooldown (seconds).
    #[serde(default = "default_cooldown_normal_secs")]
    pub cooldown_normal_secs: u64,

    /// Cooldown after a stop-loss exit (seconds) — longer to avoid thrashing.
    #[serde(default = "default_cooldown_stop_loss_secs")]
    pub cooldown_stop_loss_secs: u64,

    /// Minimum holding period before a discretionary sell (seconds).
    #[serde(default = "default_min_holding_period_secs")]
    pub min_holding_period_secs: u64,

    /// Per-second rate-limit bucket capacity.
    #[serde(default = "default_max_per_second")]
    pub max_per_second: usize,

    /// Per-minute rate-limit bucket capacity.
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: usize,

    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Seconds the breaker stays open before probing (half-open).
    #[serde(default = "default_circuit_reset_timeout_secs")]
    pub circuit_reset_timeout_secs: u64,

    /// Scan cycle length (seconds).
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Sleep while the market is closed (seconds).
    #[serde(default = "default_off_hours_interval_secs")]
    pub off_hours_interval_secs: u64,

    /// Dev only: run the full pipeline regardless of market hours.
    #[serde(default)]
    pub bypass_market_hours: bool,

    /// |rho| at or above which a correlated index blocks a new F&O entry.
    #[serde(default = "default_correlation_block_threshold")]
    pub correlation_block_threshold: f64,

    /// Absolute per-position value cap.
    #[serde(default = "default_max_position_value")]
    pub max_position_value: f64,

    /// Symbols fetched per scan batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between scan batches (milliseconds).
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,

    /// Market-data cache TTL (seconds).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Wall-time budget for order-status polling (seconds).
    #[serde(default = "default_order_status_budget_secs")]
    pub order_status_budget_secs: u64,

    /// Worst-case loss allowed for a structured F&O position, as a fraction
    /// of cash.
    #[serde(default = "default_max_trade_risk_pct")]
    pub max_trade_risk_pct: f64,

    /// Minimum aggregated confidence for an F&O entry.
    #[serde(default = "default_min_fno_confidence")]
    pub min_fno_confidence: f64,

    /// Sigma multiple for strangle / condor wing strikes.
    #[serde(default = "default_strangle_sigma_k")]
    pub strangle_sigma_k: f64,

    /// Scheduler-level trend filter on entries. The aggregator itself is
    /// regime-agnostic.
    #[serde(default = "default_true")]
    pub trend_filter: bool,

    /// Aggressive profile: entries skip the trend filter.
    #[serde(default)]
    pub aggressive_profile: bool,

    /// Base URL of the telemetry sink (empty disables publishing).
    #[serde(default)]
    pub telemetry_url: String,

    /// Telemetry queue capacity; oldest events are dropped when full.
    #[serde(default = "default_telemetry_queue_capacity")]
    pub telemetry_queue_capacity: usize,

    /// Directory for snapshots and archives.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Directory for per-day JSONL trade logs.
    #[serde(default = "default_trades_dir")]
    pub trades_dir: String,

    /// Exchange holidays (trading days on which the market is closed).
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    /// Symbol → sector, for correlation-aware reporting. Unknown symbols
    /// fall back to "UNKNOWN".
    #[serde(default)]
    pub sector_map: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialise")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            mode = %config.mode,
            symbols = config.symbols.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` atomically (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Validate the full configuration in one place. Called once at startup;
    /// any violation is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= 0.0 {
            bail!("initial_capital must be positive");
        }
        if self.symbols.is_empty() {
            bail!("symbols must not be empty");
        }
        for symbol in &self.symbols {
            if !crate::types::is_valid_equity_symbol(symbol) {
                bail!("malformed symbol '{symbol}' in symbol list");
            }
        }
        for pct in [
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("max_trade_risk_pct", self.max_trade_risk_pct),
        ] {
            if !(0.0..=1.0).contains(&pct.1) {
                bail!("{} must be within [0, 1], got {}", pct.0, pct.1);
            }
        }
        for th in [
            ("min_confidence_entry", self.min_confidence_entry),
            ("min_confidence_exit", self.min_confidence_exit),
            ("agreement_threshold_entry", self.agreement_threshold_entry),
            ("agreement_threshold_exit", self.agreement_threshold_exit),
            ("min_fno_confidence", self.min_fno_confidence),
        ] {
            if !(0.0..=1.0).contains(&th.1) {
                bail!("{} must be within [0, 1], got {}", th.0, th.1);
            }
        }
        if self.agreement_threshold_exit > self.agreement_threshold_entry {
            bail!("agreement_threshold_exit must not exceed agreement_threshold_entry");
        }
        if self.min_confidence_exit > self.min_confidence_entry {
            bail!("min_confidence_exit must not exceed min_confidence_entry");
        }
        for mult in [
            ("atr_stop_multiplier", self.atr_stop_multiplier),
            ("atr_target_multiplier", self.atr_target_multiplier),
            (
                "trailing_activation_multiplier",
                self.trailing_activation_multiplier,
            ),
            ("trailing_stop_multiplier", self.trailing_stop_multiplier),
        ] {
            if mult.1 <= 0.0 {
                bail!("{} must be positive, got {}", mult.0, mult.1);
            }
        }
        if !(0.0..=1.0).contains(&self.correlation_block_threshold) {
            bail!("correlation_block_threshold must be within [0, 1]");
        }
        if self.max_per_second == 0 || self.max_per_minute == 0 {
            bail!("rate-limit buckets must have capacity >= 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be >= 1");
        }
        if self.max_positions == 0 {
            bail!("max_positions must be >= 1");
        }
        if self.max_position_value <= 0.0 {
            bail!("max_position_value must be positive");
        }
        Ok(())
    }

    /// Sector for a symbol, defaulting to "UNKNOWN".
    pub fn sector(&self, symbol: &str) -> String {
        self.sector_map
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.mode, TradingMode::Paper);
        assert!((cfg.initial_capital - 1_000_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_positions, 25);
        assert!((cfg.risk_per_trade_pct - 0.015).abs() < f64::EPSILON);
        assert!((cfg.atr_stop_multiplier - 1.8).abs() < f64::EPSILON);
        assert!((cfg.atr_target_multiplier - 4.5).abs() < f64::EPSILON);
        assert!((cfg.min_confidence_entry - 0.45).abs() < f64::EPSILON);
        assert_eq!(cfg.cooldown_normal_secs, 900);
        assert_eq!(cfg.cooldown_stop_loss_secs, 1800);
        assert_eq!(cfg.max_per_second, 3);
        assert_eq!(cfg.max_per_minute, 60);
        assert_eq!(cfg.check_interval_secs, 30);
        assert_eq!(cfg.off_hours_interval_secs, 300);
        assert!(!cfg.bypass_market_hours);
        assert!((cfg.correlation_block_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, TradingMode::Paper);
        assert_eq!(cfg.circuit_failure_threshold, 5);
        assert_eq!(cfg.circuit_reset_timeout_secs, 60);
        assert!(cfg.trend_filter);
        assert!(!cfg.aggressive_profile);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "mode": "backtest", "symbols": ["TCS"] }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, TradingMode::Backtest);
        assert_eq!(cfg.symbols, vec!["TCS"]);
        assert_eq!(cfg.max_positions, 25);
    }

    #[test]
    fn validation_rejects_inverted_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.min_confidence_exit = 0.9; // above entry threshold
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_malformed_symbols() {
        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["tcs".to_string()];
        assert!(cfg.validate().is_err());
        cfg.symbols = vec!["M&M".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_capital() {
        let mut cfg = EngineConfig::default();
        cfg.initial_capital = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_rate_bucket() {
        let mut cfg = EngineConfig::default();
        cfg.max_per_second = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.mode, cfg2.mode);
        assert_eq!(cfg.max_positions, cfg2.max_positions);
    }

    #[test]
    fn sector_lookup_falls_back() {
        let mut cfg = EngineConfig::default();
        cfg.sector_map
            .insert("RELIANCE".to_string(), "ENERGY".to_string());
        assert_eq!(cfg.sector("RELIANCE"), "ENERGY");
        assert_eq!(cfg.sector("TCS"), "UNKNOWN");
    }
}
