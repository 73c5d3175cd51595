// =============================================================================
// Wall Tracker — Main Entry Point
// =============================================================================
//
// Wires C1 (exchange client) through C9 (tiered fan-out): builds the shared
// `PipelineContext`, runs the one-shot primary scan, then spawns the general
// scanner, the observer/hot adaptive worker pools, their resize/distribute
// supervisors, and the REST+WebSocket server. Shuts down gracefully on
// Ctrl+C, flushing the hot-order snapshot and the runtime config.
// =============================================================================

mod app_state;
mod config;
mod error;
mod exchange;
mod fanout;
mod persistence;
mod pools;
mod precision;
mod scanners;
mod types;
mod wall_detector;
mod weight_engine;
mod worker_manager;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{PipelineContext, PipelineContextBuilder};
use crate::config::{AppConfig, Cli};
use crate::exchange::binance::BinanceFuturesClient;
use crate::exchange::rate_limit::RateLimiter;
use crate::exchange::ExchangeClient;
use crate::fanout::{FanoutContext, FanoutServer};
use crate::persistence::HotOrderPersistence;
use crate::pools::hot::{HotPool, MarketContextCache};
use crate::pools::observer::ObserverPool;
use crate::types::{HotEvent, MarketContext, MarketTemperature, ObserverEvent};
use crate::weight_engine::WeightEngineConfig;
use crate::worker_manager::{AdaptiveWorkerManager, ScanFn, Staircase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("wall-tracker starting up");

    let cli = Cli::parse();
    let loaded = AppConfig::load(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, path = %cli.config.display(), "failed to load config, using defaults");
        AppConfig::default()
    });
    let config = cli.apply(loaded);
    info!(bind_addr = %config.bind_addr, top_coins_limit = config.top_coins_limit, "configuration resolved");

    // ── Exchange client ──────────────────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_SECRET_KEY").unwrap_or_default();
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceFuturesClient::new(api_key, api_secret));
    let rate_limiter = Arc::new(RateLimiter::new(config.requests_per_second));

    // ── Pools ────────────────────────────────────────────────────────────
    let observer = Arc::new(ObserverPool::new(
        config.survival_threshold,
        config.promotion_lifetime_secs,
        config.observer_cleanup_empty_scans,
    ));
    let hot_pool = Arc::new(HotPool::new(
        config.weight_change_threshold,
        config.usd_change_threshold,
        WeightEngineConfig::default(),
        config.weight_algorithm.clone(),
    ));
    let market_context_cache = Arc::new(MarketContextCache::new(chrono::Duration::seconds(30)));

    // ── Fan-out + persistence ────────────────────────────────────────────
    let fanout = FanoutServer::new(Duration::from_secs(config.public_delay_secs), "binance");
    let persistence = Arc::new(HotOrderPersistence::new(
        config.hot_orders_path.clone(),
        "binance",
        Duration::from_secs(5),
    ));

    // ── Adaptive worker pools (C5/C6) ────────────────────────────────────
    let observer_scan_fn: ScanFn = {
        let exchange = exchange.clone();
        let rate_limiter = rate_limiter.clone();
        let observer = observer.clone();
        let hot_pool = hot_pool.clone();
        let fanout = fanout.clone();
        let persistence = persistence.clone();
        let depth = config.orderbook_depth;
        Arc::new(move |symbol: String| {
            let exchange = exchange.clone();
            let rate_limiter = rate_limiter.clone();
            let observer = observer.clone();
            let hot_pool = hot_pool.clone();
            let fanout = fanout.clone();
            let persistence = persistence.clone();
            Box::pin(async move {
                scan_observer_symbol(&symbol, exchange.as_ref(), &rate_limiter, &observer, &hot_pool, &fanout, &persistence, depth).await;
            })
        })
    };
    let observer_workers = Arc::new(AdaptiveWorkerManager::new(
        1,
        config.worker_staircase.iter().map(|(_, w)| *w).max().unwrap_or(8),
        Staircase::new(config.worker_staircase.clone()),
        observer_scan_fn,
        Duration::from_millis(500),
    ));

    let hot_scan_fn: ScanFn = {
        let exchange = exchange.clone();
        let rate_limiter = rate_limiter.clone();
        let hot_pool = hot_pool.clone();
        let market_context_cache = market_context_cache.clone();
        let fanout = fanout.clone();
        let persistence = persistence.clone();
        let depth = config.orderbook_depth;
        Arc::new(move |symbol: String| {
            let exchange = exchange.clone();
            let rate_limiter = rate_limiter.clone();
            let hot_pool = hot_pool.clone();
            let market_context_cache = market_context_cache.clone();
            let fanout = fanout.clone();
            let persistence = persistence.clone();
            Box::pin(async move {
                scan_hot_symbol(&symbol, exchange.as_ref(), &rate_limiter, &hot_pool, &market_context_cache, &fanout, &persistence, depth).await;
            })
        })
    };
    let hot_workers = Arc::new(AdaptiveWorkerManager::new(
        1,
        config.worker_staircase.iter().map(|(_, w)| *w).max().unwrap_or(8),
        Staircase::new(config.worker_staircase.clone()),
        hot_scan_fn,
        Duration::from_secs(config.hot_reeval_interval_secs),
    ));

    // ── Shared pipeline context ──────────────────────────────────────────
    let pipeline = Arc::new(
        PipelineContextBuilder::new(
            config.clone(),
            exchange.clone(),
            rate_limiter.clone(),
            observer.clone(),
            hot_pool.clone(),
            market_context_cache.clone(),
            observer_workers.clone(),
            hot_workers.clone(),
            fanout.clone(),
            persistence.clone(),
        )
        .build(),
    );

    // ── Universe bootstrap ───────────────────────────────────────────────
    refresh_universe(&pipeline).await;

    // ── Primary scan (C3), one-shot ──────────────────────────────────────
    let primary_symbols = if let Some(symbols) = &cli.primary_scan_only {
        if symbols.is_empty() { pipeline.universe.read().clone() } else { symbols.clone() }
    } else {
        pipeline.universe.read().clone()
    };
    info!(count = primary_symbols.len(), "running primary scan");
    let report = scanners::primary::run_full_scan(
        exchange.clone(),
        rate_limiter.clone(),
        observer.clone(),
        primary_symbols,
        config.primary_workers,
        config.orderbook_depth,
        config.large_order_multiplier,
    )
    .await;
    info!(
        large_orders = report.total_large_orders,
        symbols_scanned = report.total_symbols_scanned,
        duration_seconds = report.duration_seconds,
        "primary scan complete"
    );

    if cli.primary_scan_only.is_some() {
        info!("primary-scan-only mode, exiting");
        return Ok(());
    }

    // ── General scanner (C4) ─────────────────────────────────────────────
    {
        let exchange = exchange.clone();
        let rate_limiter = rate_limiter.clone();
        let observer = observer.clone();
        let universe = pipeline.universe.clone();
        let batch_size = config.general_batch_size;
        let depth = config.orderbook_depth;
        let multiplier = config.large_order_multiplier;
        let interval = Duration::from_secs(config.general_scan_interval_secs);
        tokio::spawn(async move {
            scanners::general::run_forever(exchange, rate_limiter, observer, universe, batch_size, depth, multiplier, interval).await;
        });
    }

    // ── Universe refresh loop ────────────────────────────────────────────
    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                refresh_universe(&pipeline).await;
            }
        });
    }

    // ── C5/C6 resize + distribute supervisor ─────────────────────────────
    {
        let observer = observer.clone();
        let hot_pool = hot_pool.clone();
        let observer_workers = observer_workers.clone();
        let hot_workers = hot_workers.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;

                let observer_symbols = observer.owned_symbols();
                observer_workers.resize_for_load(observer_symbols.len()).await;
                observer_workers.distribute(&observer_symbols).await;

                let hot_symbols = hot_pool.owned_symbols();
                hot_workers.resize_for_load(hot_symbols.len()).await;
                hot_workers.distribute(&hot_symbols).await;
            }
        });
    }

    // ── Persistence debounce loop ────────────────────────────────────────
    {
        let hot_pool = hot_pool.clone();
        let persistence = persistence.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                if let Err(e) = persistence.maybe_save(&hot_pool) {
                    warn!(error = %e, "hot order snapshot write failed");
                }
            }
        });
    }

    // ── REST + WebSocket server ──────────────────────────────────────────
    let fanout_ctx = Arc::new(FanoutContext {
        server: fanout.clone(),
        private_token: std::env::var("WEBSOCKET_PRIVATE_TOKEN").unwrap_or_default(),
        vip_token: std::env::var("WEBSOCKET_VIP_TOKEN").unwrap_or_default(),
        public_delay: Duration::from_secs(config.public_delay_secs),
    });
    {
        let pipeline = pipeline.clone();
        let fanout_ctx = fanout_ctx.clone();
        let bind_addr = config.bind_addr.clone();
        tokio::spawn(async move {
            let app = fanout::rest::router(pipeline, fanout_ctx);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind fan-out server");
            info!(addr = %bind_addr, "fan-out server listening");
            axum::serve(listener, app).await.expect("fan-out server failed");
        });
    }

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    observer_workers.shutdown().await;
    hot_workers.shutdown().await;

    if let Err(e) = persistence.save_now(&hot_pool) {
        error!(error = %e, "failed to save hot order snapshot on shutdown");
    }
    if let Err(e) = config.save(&cli.config) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("wall-tracker shut down complete");
    Ok(())
}

/// Refresh the shared symbol universe from the exchange's top-by-volume
/// ranking (or the configured allow-list, if one is set).
async fn refresh_universe(pipeline: &PipelineContext) {
    let symbols = if !pipeline.config.symbols.is_empty() {
        pipeline.config.symbols.clone()
    } else {
        match pipeline.exchange.get_top_by_quote_volume(pipeline.config.top_coins_limit).await {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "failed to refresh universe, keeping previous snapshot");
                return;
            }
        }
    };
    info!(count = symbols.len(), "universe refreshed");
    *pipeline.universe.write() = symbols;
    pipeline.increment_version();
}

/// One observer-pool (C5) worker iteration for `symbol`: fetch a fresh book,
/// re-evaluate every order the pool tracks there, and act on the resulting
/// events (promote into C6, publish, or just let deaths/updates pass).
#[allow(clippy::too_many_arguments)]
async fn scan_observer_symbol(
    symbol: &str,
    exchange: &dyn ExchangeClient,
    rate_limiter: &RateLimiter,
    observer: &ObserverPool,
    hot_pool: &HotPool,
    fanout: &FanoutServer,
    persistence: &HotOrderPersistence,
    depth: u32,
) {
    rate_limiter.acquire().await;
    let book = match exchange.get_orderbook(symbol, depth).await {
        Ok(book) => book,
        Err(e) => {
            warn!(symbol, error = %e, "observer pool: orderbook fetch failed");
            return;
        }
    };
    let precision = match exchange.get_price_precision(symbol).await {
        Ok(precision) => precision,
        Err(e) => {
            warn!(symbol, error = %e, "observer pool: precision fetch failed");
            return;
        }
    };

    let now = Utc::now();
    let events = observer.scan_symbol(symbol, &book, &precision, now);
    for event in events {
        if let ObserverEvent::Promote(tracked, lifetime_seconds) = event {
            let fingerprint = hot_pool.admit(tracked, lifetime_seconds, now);
            if let Some(order) = hot_pool.get(&fingerprint) {
                fanout.publish("hot_order_new", &order);
                if let Err(e) = persistence.maybe_save(hot_pool) {
                    warn!(error = %e, "hot order snapshot write failed after promotion");
                }
            }
        }
    }
}

/// One hot-pool (C6) worker iteration for `symbol`: fetch a fresh book and
/// market context, re-evaluate every hot order there, and publish any
/// update the hot pool flags as significant.
#[allow(clippy::too_many_arguments)]
async fn scan_hot_symbol(
    symbol: &str,
    exchange: &dyn ExchangeClient,
    rate_limiter: &RateLimiter,
    hot_pool: &HotPool,
    market_context_cache: &MarketContextCache,
    fanout: &FanoutServer,
    persistence: &HotOrderPersistence,
    depth: u32,
) {
    rate_limiter.acquire().await;
    let book = match exchange.get_orderbook(symbol, depth).await {
        Ok(book) => book,
        Err(e) => {
            warn!(symbol, error = %e, "hot pool: orderbook fetch failed");
            return;
        }
    };
    let precision = match exchange.get_price_precision(symbol).await {
        Ok(precision) => precision,
        Err(e) => {
            warn!(symbol, error = %e, "hot pool: precision fetch failed");
            return;
        }
    };

    let now = Utc::now();
    let context = market_context_cache
        .get_or_fetch(symbol, now, || async {
            let volatility_1h = exchange.get_volatility(symbol, "1h").await.unwrap_or(0.0);
            let volatility_24h = exchange.get_volatility(symbol, "24h").await.unwrap_or(0.0);
            MarketContext {
                volatility_1h,
                volatility_24h,
                market_temperature: MarketTemperature::from_volatility_1h(volatility_1h),
                ..Default::default()
            }
        })
        .await;

    let outcomes = hot_pool.reevaluate_symbol(symbol, &book, &precision, &context, now);
    let mut wrote = false;
    for outcome in outcomes {
        if !outcome.significant {
            continue;
        }
        match outcome.event {
            HotEvent::Remove(_) => {
                // Order already gone from the pool; nothing left to snapshot
                // into a projection. Persist the new (smaller) catalog.
                if !wrote {
                    if let Err(e) = persistence.maybe_save(hot_pool) {
                        warn!(error = %e, "hot order snapshot write failed after removal");
                    }
                    wrote = true;
                }
            }
            HotEvent::Update(_) | HotEvent::Admit(_) => {
                if let Some(order) = hot_pool.get(&outcome.fingerprint) {
                    fanout.publish("hot_order_update", &order);
                }
            }
        }
    }
}
