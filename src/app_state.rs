// =============================================================================
// Central Pipeline State
// =============================================================================
//
// `PipelineContext` is what the teacher's `AppState` was for the trading
// engine: the single `Arc`-shared struct every task (scanners, worker
// managers, the REST/WS surface) holds a reference to. It owns no business
// logic itself — C2-C9 each own their own state — it just wires the pieces
// together and exposes the `/health`/`/stats` snapshot the REST surface
// serves. Version-counter-on-mutation and snapshot-builder shape follow the
// teacher's `app_state.rs` directly, narrowed to this pipeline's own data.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::AppConfig;
use crate::exchange::rate_limit::RateLimiter;
use crate::exchange::ExchangeClient;
use crate::fanout::FanoutServer;
use crate::persistence::HotOrderPersistence;
use crate::pools::hot::{HotPool, MarketContextCache};
use crate::pools::observer::ObserverPool;
use crate::types::Symbol;
use crate::worker_manager::AdaptiveWorkerManager;

/// Everything the pipeline's tasks share. Construct once in `main`, wrap in
/// `Arc`, clone the `Arc` into every spawned task.
pub struct PipelineContext {
    pub config: AppConfig,
    pub exchange: Arc<dyn ExchangeClient>,
    pub rate_limiter: Arc<RateLimiter>,

    pub observer: Arc<ObserverPool>,
    pub hot_pool: Arc<HotPool>,
    pub market_context_cache: Arc<MarketContextCache>,

    pub observer_workers: Arc<AdaptiveWorkerManager>,
    pub hot_workers: Arc<AdaptiveWorkerManager>,

    pub fanout: Arc<FanoutServer>,
    pub persistence: Arc<HotOrderPersistence>,

    /// Top-volume-first symbol universe, refreshed periodically from the
    /// exchange and read by the general scanner each cycle.
    pub universe: Arc<RwLock<Vec<Symbol>>>,

    state_version: AtomicU64,
    start_time: Instant,
}

impl PipelineContext {
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build the `/stats` REST payload.
    pub fn build_stats(&self) -> StatsSnapshot {
        let (basic, gold, diamond) = self.hot_pool.category_counts();
        StatsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            state_version: self.current_version(),
            universe_size: self.universe.read().len(),
            observer_tracked: self.observer.tracked_count(),
            observer_owned_symbols: self.observer.owned_symbols().len(),
            hot_tracked: self.hot_pool.tracked_count(),
            hot_category_counts: CategoryCounts { basic, gold, diamond },
            rate_limiter_tokens_available: self.rate_limiter.available(),
        }
    }
}

/// Builder for [`PipelineContext`]. Exists because the struct has too many
/// constructor arguments to pass positionally without them being
/// interchangeable by type (several `Arc<...>` fields of unrelated
/// meaning) — named setters make call sites at the wiring point in `main`
/// self-documenting.
pub struct PipelineContextBuilder {
    config: AppConfig,
    exchange: Arc<dyn ExchangeClient>,
    rate_limiter: Arc<RateLimiter>,
    observer: Arc<ObserverPool>,
    hot_pool: Arc<HotPool>,
    market_context_cache: Arc<MarketContextCache>,
    observer_workers: Arc<AdaptiveWorkerManager>,
    hot_workers: Arc<AdaptiveWorkerManager>,
    fanout: Arc<FanoutServer>,
    persistence: Arc<HotOrderPersistence>,
}

impl PipelineContextBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        rate_limiter: Arc<RateLimiter>,
        observer: Arc<ObserverPool>,
        hot_pool: Arc<HotPool>,
        market_context_cache: Arc<MarketContextCache>,
        observer_workers: Arc<AdaptiveWorkerManager>,
        hot_workers: Arc<AdaptiveWorkerManager>,
        fanout: Arc<FanoutServer>,
        persistence: Arc<HotOrderPersistence>,
    ) -> Self {
        Self {
            config,
            exchange,
            rate_limiter,
            observer,
            hot_pool,
            market_context_cache,
            observer_workers,
            hot_workers,
            fanout,
            persistence,
        }
    }

    pub fn build(self) -> PipelineContext {
        PipelineContext {
            config: self.config,
            exchange: self.exchange,
            rate_limiter: self.rate_limiter,
            observer: self.observer,
            hot_pool: self.hot_pool,
            market_context_cache: self.market_context_cache,
            observer_workers: self.observer_workers,
            hot_workers: self.hot_workers,
            fanout: self.fanout,
            persistence: self.persistence,
            universe: Arc::new(RwLock::new(Vec::new())),
            state_version: AtomicU64::new(1),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCounts {
    pub basic: usize,
    pub gold: usize,
    pub diamond: usize,
}

/// `/stats` REST payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub state_version: u64,
    pub universe_size: usize,
    pub observer_tracked: usize,
    pub observer_owned_symbols: usize,
    pub hot_tracked: usize,
    pub hot_category_counts: CategoryCounts,
    pub rate_limiter_tokens_available: u32,
}
