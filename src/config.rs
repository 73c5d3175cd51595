// =============================================================================
// Runtime Configuration — hot-reloadable pipeline settings with atomic save
// =============================================================================
//
// Every tunable lives here so the pipeline can be retuned without a
// restart. Persistence uses the same atomic tmp + rename pattern the
// teacher uses for its own config, and every field carries a serde default
// so that adding a field never breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers
// =============================================================================

fn default_large_order_multiplier() -> f64 {
    5.0
}

fn default_orderbook_depth() -> u32 {
    100
}

fn default_top_coins_limit() -> usize {
    200
}

fn default_primary_workers() -> usize {
    8
}

fn default_general_batch_size() -> usize {
    50
}

fn default_general_scan_interval_secs() -> u64 {
    2
}

fn default_survival_threshold() -> f64 {
    0.7
}

fn default_promotion_lifetime_secs() -> f64 {
    60.0
}

fn default_observer_cleanup_empty_scans() -> u32 {
    10
}

fn default_hot_reeval_interval_secs() -> u64 {
    5
}

fn default_weight_change_threshold() -> f64 {
    0.15
}

fn default_usd_change_threshold() -> f64 {
    10_000.0
}

fn default_weight_algorithm() -> String {
    "hybrid".to_string()
}

fn default_worker_staircase() -> Vec<(usize, usize)> {
    vec![(0, 2), (50, 4), (150, 8), (300, 16)]
}

fn default_requests_per_second() -> u32 {
    18
}

fn default_io_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_public_delay_secs() -> u64 {
    2
}

fn default_hot_orders_path() -> String {
    "hot_orders.json".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_symbols() -> Vec<String> {
    Vec::new()
}

// =============================================================================
// AppConfig
// =============================================================================

/// Top-level runtime configuration for the wall-tracking pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Explicit symbol allow-list; empty means "derive from exchange universe".
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Multiplier over the top-10 baseline notional that marks an entry
    /// as a wall (C2).
    #[serde(default = "default_large_order_multiplier")]
    pub large_order_multiplier: f64,

    /// Levels per side requested from the venue order book.
    #[serde(default = "default_orderbook_depth")]
    pub orderbook_depth: u32,

    /// How many top-by-volume symbols the primary scanner (C3) covers.
    #[serde(default = "default_top_coins_limit")]
    pub top_coins_limit: usize,

    /// Worker count for the one-shot primary scan.
    #[serde(default = "default_primary_workers")]
    pub primary_workers: usize,

    /// Symbols per scan cycle for the general scanner (C4).
    #[serde(default = "default_general_batch_size")]
    pub general_batch_size: usize,

    /// Seconds between general-scanner cycles.
    #[serde(default = "default_general_scan_interval_secs")]
    pub general_scan_interval_secs: u64,

    /// `S_survive`: minimum `current/anchor` quantity ratio for an order to
    /// still count as alive.
    #[serde(default = "default_survival_threshold")]
    pub survival_threshold: f64,

    /// `T_promote`: minimum lifetime, in seconds, before a surviving order
    /// is promoted to the hot pool.
    #[serde(default = "default_promotion_lifetime_secs")]
    pub promotion_lifetime_secs: f64,

    /// `N_cleanup`: consecutive empty scans of a symbol before the
    /// observer pool releases its exclusion claim on it.
    #[serde(default = "default_observer_cleanup_empty_scans")]
    pub observer_cleanup_empty_scans: u32,

    /// Seconds between hot-pool (C6) re-evaluation cycles.
    #[serde(default = "default_hot_reeval_interval_secs")]
    pub hot_reeval_interval_secs: u64,

    /// Fractional weight-change OR-trigger for "significant" hot-order updates.
    #[serde(default = "default_weight_change_threshold")]
    pub weight_change_threshold: f64,

    /// Absolute notional-change (USD) OR-trigger for "significant" updates.
    #[serde(default = "default_usd_change_threshold")]
    pub usd_change_threshold: f64,

    /// Which weight-engine algorithm is exposed as "recommended".
    #[serde(default = "default_weight_algorithm")]
    pub weight_algorithm: String,

    /// Adaptive worker manager staircase: `(load_threshold, worker_count)`
    /// pairs, ascending by threshold. The last entry whose threshold is
    /// `<= current_load` wins.
    #[serde(default = "default_worker_staircase")]
    pub worker_staircase: Vec<(usize, usize)>,

    /// Token-bucket budget for outgoing venue requests.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Per-call venue I/O timeout.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// `R_max`: maximum retry attempts for a transient venue failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay applied to the Public fan-out tier.
    #[serde(default = "default_public_delay_secs")]
    pub public_delay_secs: u64,

    /// Path the hot pool persists its state to.
    #[serde(default = "default_hot_orders_path")]
    pub hot_orders_path: String,

    /// Address the fan-out server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            large_order_multiplier: default_large_order_multiplier(),
            orderbook_depth: default_orderbook_depth(),
            top_coins_limit: default_top_coins_limit(),
            primary_workers: default_primary_workers(),
            general_batch_size: default_general_batch_size(),
            general_scan_interval_secs: default_general_scan_interval_secs(),
            survival_threshold: default_survival_threshold(),
            promotion_lifetime_secs: default_promotion_lifetime_secs(),
            observer_cleanup_empty_scans: default_observer_cleanup_empty_scans(),
            hot_reeval_interval_secs: default_hot_reeval_interval_secs(),
            weight_change_threshold: default_weight_change_threshold(),
            usd_change_threshold: default_usd_change_threshold(),
            weight_algorithm: default_weight_algorithm(),
            worker_staircase: default_worker_staircase(),
            requests_per_second: default_requests_per_second(),
            io_timeout_secs: default_io_timeout_secs(),
            max_retries: default_max_retries(),
            public_delay_secs: default_public_delay_secs(),
            hot_orders_path: default_hot_orders_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        info!(path = %path.display(), symbols = ?config.symbols, "config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to a `.tmp` sibling, then rename over the destination).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Resolve the worker count for `current_load` from the staircase
    /// table: the last entry whose threshold is `<= current_load`.
    pub fn worker_count_for_load(&self, current_load: usize) -> usize {
        self.worker_staircase
            .iter()
            .filter(|(threshold, _)| *threshold <= current_load)
            .map(|(_, count)| *count)
            .last()
            .unwrap_or(1)
    }
}

// =============================================================================
// CLI overlay
// =============================================================================

/// Command-line entry point. Flags override whatever `--config` loaded;
/// env vars (`env` attribute) fill in when a flag is omitted.
#[derive(Debug, Parser)]
#[command(name = "wall-tracker", about = "Futures order-book wall tracking pipeline")]
pub struct Cli {
    /// Path to a JSON config file.
    #[arg(long, default_value = "wall_tracker_config.json")]
    pub config: PathBuf,

    /// Address the fan-out WebSocket/REST server binds to.
    #[arg(long, env = "WALL_TRACKER_BIND_ADDR")]
    pub bind: Option<String>,

    /// Run only the one-shot primary scan over the given symbols (or the
    /// configured top-volume universe if none are given) and exit.
    #[arg(long, value_name = "SYMBOL", num_args = 0..)]
    pub primary_scan_only: Option<Vec<String>>,

    /// Comma-separated symbol override, applied after `--config`.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

impl Cli {
    /// Build an [`AppConfig`] from the loaded file, overlaid with any CLI
    /// flags the user actually passed.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(symbols) = &self.symbols {
            config.symbols = symbols.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();
        assert!(cfg.symbols.is_empty());
        assert_eq!(cfg.large_order_multiplier, 5.0);
        assert_eq!(cfg.survival_threshold, 0.7);
        assert_eq!(cfg.promotion_lifetime_secs, 60.0);
        assert_eq!(cfg.observer_cleanup_empty_scans, 10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.top_coins_limit, 200);
        assert_eq!(cfg.weight_algorithm, "hybrid");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["BTCUSDT"], "large_order_multiplier": 8.0 }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["BTCUSDT"]);
        assert_eq!(cfg.large_order_multiplier, 8.0);
        assert_eq!(cfg.survival_threshold, 0.7);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = AppConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.worker_staircase, cfg2.worker_staircase);
        assert_eq!(cfg.requests_per_second, cfg2.requests_per_second);
    }

    #[test]
    fn atomic_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = AppConfig::default();
        cfg.symbols = vec!["ETHUSDT".into()];
        cfg.save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["ETHUSDT".to_string()]);
    }

    #[test]
    fn worker_staircase_picks_highest_matching_threshold() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.worker_count_for_load(0), 2);
        assert_eq!(cfg.worker_count_for_load(49), 2);
        assert_eq!(cfg.worker_count_for_load(50), 4);
        assert_eq!(cfg.worker_count_for_load(299), 4);
        assert_eq!(cfg.worker_count_for_load(300), 16);
        assert_eq!(cfg.worker_count_for_load(10_000), 16);
    }
}
