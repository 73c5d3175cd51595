// =============================================================================
// Hot-order persistence — atomic `hot_orders.json` writer
// =============================================================================
//
// The only artifact the core persists. Same atomic tmp + rename pattern as
// `config::AppConfig::save`; readers (a dashboard, a restart recovery path)
// must tolerate reading a previous version but never a half-written one.
// Rate-limited to one write per `min_write_interval` regardless of how often
// the hot pool changes — grounded in
// `original_source/src/pools/hot_pool.py::_save_to_file`, which debounces
// writes the same way.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::pools::hot::HotPool;
use crate::types::HotOrderProjection;

#[derive(Serialize)]
struct PersistedSnapshot {
    timestamp: chrono::DateTime<Utc>,
    exchange: String,
    total_orders: usize,
    active_symbols: usize,
    orders: Vec<HotOrderProjection>,
}

fn to_projection(order: &crate::types::HotOrder) -> HotOrderProjection {
    let tracked = &order.tracked;
    HotOrderProjection {
        event: "snapshot",
        fingerprint: tracked.fingerprint.clone(),
        symbol: tracked.symbol.clone(),
        side: tracked.side,
        anchor_price: tracked.anchor_price.to_string(),
        current_quantity: tracked.current_quantity.to_string(),
        current_notional: tracked.current_notional.to_string(),
        lifetime_seconds: order.lifetime_seconds,
        scan_count: order.scan_count,
        growth_trend: order.growth_trend,
        stability_score: order.stability_score,
        recommended_weight: order.recommended_weight,
        recommended_category: order.recommended_category,
        market_temperature: order.context.market_temperature,
        internal_only: crate::types::InternalFields {
            weights: order.weights.clone(),
            distance_percent: tracked.distance_percent,
            is_round_level: tracked.is_round_level,
        },
    }
}

/// Debounced writer for `hot_orders.json`. Call [`maybe_save`] as often as
/// convenient (e.g. after every hot-pool re-evaluation cycle) — writes
/// actually touching disk are throttled to `min_write_interval`.
pub struct HotOrderPersistence {
    path: PathBuf,
    exchange_name: String,
    min_write_interval: Duration,
    last_write: Mutex<Option<Instant>>,
}

impl HotOrderPersistence {
    pub fn new(path: impl Into<PathBuf>, exchange_name: impl Into<String>, min_write_interval: Duration) -> Self {
        Self {
            path: path.into(),
            exchange_name: exchange_name.into(),
            min_write_interval,
            last_write: Mutex::new(None),
        }
    }

    /// Write the current hot pool snapshot if enough time has passed since
    /// the last write. Returns `true` if a write happened.
    pub fn maybe_save(&self, pool: &HotPool) -> Result<bool> {
        {
            let mut last = self.last_write.lock();
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.min_write_interval {
                    return Ok(false);
                }
            }
            *last = Some(now);
        }
        self.save_now(pool)?;
        Ok(true)
    }

    /// Write unconditionally, bypassing the debounce interval. Used on
    /// shutdown so the last state is always captured.
    pub fn save_now(&self, pool: &HotPool) -> Result<()> {
        let orders = pool.snapshot_sorted();
        let snapshot = PersistedSnapshot {
            timestamp: Utc::now(),
            exchange: self.exchange_name.clone(),
            total_orders: orders.len(),
            active_symbols: pool.owned_symbols().len(),
            orders: orders.iter().map(to_projection).collect(),
        };
        write_atomic(&self.path, &snapshot)
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("failed to serialise hot orders snapshot")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content).with_context(|| format!("failed to write tmp snapshot to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp snapshot to {}", path.display()))?;
    debug!(path = %path.display(), "hot orders snapshot saved (atomic)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_save_is_debounced_within_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hot_orders.json");
        let persistence = HotOrderPersistence::new(&path, "binance", Duration::from_secs(60));
        let pool = HotPool::new(0.15, 10_000.0, Default::default(), "hybrid");

        assert!(persistence.maybe_save(&pool).unwrap());
        assert!(!persistence.maybe_save(&pool).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn save_now_always_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hot_orders.json");
        let persistence = HotOrderPersistence::new(&path, "binance", Duration::from_secs(60));
        let pool = HotPool::new(0.15, 10_000.0, Default::default(), "hybrid");

        persistence.save_now(&pool).unwrap();
        persistence.save_now(&pool).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"exchange\": \"binance\""));
    }
}
