// =============================================================================
// Hot Pool (C6) — richly annotated final stage for promoted orders
// =============================================================================
//
// Mirrors the observer pool's shape: a `RwLock`-guarded map plus a
// symbol index, touched only through locked methods that never hold the
// lock across an await point. Re-evaluation (weight/category, growth
// trend, significance) is pure and delegates to `weight_engine`; venue
// I/O (price, orderbook, volatility) lives in the caller, same split as
// the observer pool's relationship to its scanners.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::precision::SymbolPrecision;
use crate::types::{
    Fingerprint, HotEvent, HotOrder, MarketContext, OrderBook, Snapshot, Symbol, TrackedOrder,
};
use crate::weight_engine::{self, WeightEngineConfig, WeightInput};

struct Inner {
    orders: HashMap<Fingerprint, HotOrder>,
    by_symbol: HashMap<Symbol, HashSet<Fingerprint>>,
}

/// Outcome of re-evaluating one hot order against a fresh order book.
pub struct HotUpdateOutcome {
    pub fingerprint: Fingerprint,
    pub event: HotEvent,
    pub significant: bool,
}

pub struct HotPool {
    inner: RwLock<Inner>,
    weight_change_threshold: f64,
    usd_change_threshold: f64,
    weight_config: WeightEngineConfig,
    /// Which algorithm's score `WeightScores::recommended` picks as "the"
    /// weight/category surfaced everywhere outside the raw `weights` blob.
    weight_algorithm: String,
}

impl HotPool {
    pub fn new(
        weight_change_threshold: f64,
        usd_change_threshold: f64,
        weight_config: WeightEngineConfig,
        weight_algorithm: impl Into<String>,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner { orders: HashMap::new(), by_symbol: HashMap::new() }),
            weight_change_threshold,
            usd_change_threshold,
            weight_config,
            weight_algorithm: weight_algorithm.into(),
        }
    }

    /// Admit a freshly promoted order. Returns its fingerprint (unchanged
    /// from observer-pool tracking — promotion never re-mints identity).
    pub fn admit(&self, tracked: TrackedOrder, lifetime_seconds: f64, now: DateTime<Utc>) -> Fingerprint {
        let fingerprint = tracked.fingerprint.clone();
        let symbol = tracked.symbol.clone();
        let hot = HotOrder::admit(tracked, lifetime_seconds, now);

        let mut inner = self.inner.write();
        inner.by_symbol.entry(symbol).or_default().insert(fingerprint.clone());
        inner.orders.insert(fingerprint.clone(), hot);
        fingerprint
    }

    pub fn owned_symbols(&self) -> Vec<Symbol> {
        self.inner
            .read()
            .by_symbol
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    pub fn get(&self, fingerprint: &str) -> Option<HotOrder> {
        self.inner.read().orders.get(fingerprint).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.read().orders.len()
    }

    /// Re-evaluate every hot order on `symbol` against a fresh book and
    /// market context. An order missing from the book is removed outright
    /// (the hot pool has no survival-ratio grace, unlike the observer
    /// pool — by the time an order is hot its anchor has already cleared
    /// that bar once).
    pub fn reevaluate_symbol(
        &self,
        symbol: &str,
        book: &OrderBook,
        precision: &SymbolPrecision,
        context: &MarketContext,
        now: DateTime<Utc>,
    ) -> Vec<HotUpdateOutcome> {
        let mut inner = self.inner.write();

        let fingerprints: Vec<Fingerprint> = inner
            .by_symbol
            .get(symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut outcomes = Vec::new();
        for fingerprint in fingerprints {
            let Some(hot) = inner.orders.get(&fingerprint) else { continue };
            let side = book.side(hot.tracked.side);
            let found = side
                .entries
                .iter()
                .find(|entry| precision.prices_equal(entry.price, hot.tracked.anchor_price));

            match found {
                None => {
                    inner.orders.remove(&fingerprint);
                    if let Some(set) = inner.by_symbol.get_mut(symbol) {
                        set.remove(&fingerprint);
                    }
                    outcomes.push(HotUpdateOutcome {
                        fingerprint: fingerprint.clone(),
                        event: HotEvent::Remove(fingerprint),
                        significant: true,
                    });
                }
                Some(entry) => {
                    let hot = inner.orders.get_mut(&fingerprint).unwrap();
                    let previous_weight = hot.recommended_weight;
                    let previous_category = hot.recommended_category;
                    let previous_notional = hot.tracked.current_notional;

                    hot.tracked.current_quantity = entry.quantity;
                    hot.tracked.current_notional = entry.notional();
                    hot.tracked.last_seen = now;
                    hot.tracked.scan_count += 1;
                    hot.scan_count += 1;
                    hot.lifetime_seconds = hot.tracked.lifetime(now).num_milliseconds() as f64 / 1000.0;
                    hot.context = context.clone();

                    hot.push_snapshot(Snapshot {
                        at: now,
                        price: entry.price,
                        quantity: entry.quantity,
                        notional: entry.notional(),
                        distance_percent: hot.tracked.distance_percent,
                    });

                    let history_notionals: Vec<f64> = hot
                        .history
                        .iter()
                        .map(|s| s.notional.to_string().parse().unwrap_or(0.0))
                        .collect();
                    let last_three: Vec<f64> = history_notionals
                        .iter()
                        .rev()
                        .take(3)
                        .rev()
                        .copied()
                        .collect();
                    hot.growth_trend = weight_engine::growth_trend(&last_three);
                    hot.stability_score = weight_engine::stability_score(&history_notionals);

                    let input = WeightInput {
                        lifetime_seconds: hot.lifetime_seconds,
                        size_vs_average: hot.tracked.size_vs_average,
                        order_price: hot.tracked.anchor_price.to_string().parse().unwrap_or(0.0),
                        scan_count: hot.scan_count,
                    };
                    let scores = weight_engine::evaluate(
                        &input,
                        context.volatility_1h,
                        context.volatility_1h,
                        context.market_temperature,
                        &self.weight_config,
                    );
                    let recommended = scores.recommended(&self.weight_algorithm).clone();
                    hot.recommended_weight = recommended.weight;
                    hot.recommended_category = recommended.category;
                    hot.weights = Some(scores);

                    let weight_changed = (hot.recommended_weight - previous_weight).abs() > self.weight_change_threshold;
                    let notional_current: f64 = hot.tracked.current_notional.to_string().parse().unwrap_or(0.0);
                    let notional_previous: f64 = previous_notional.to_string().parse().unwrap_or(0.0);
                    let notional_changed = if notional_previous > 0.0 {
                        (notional_current - notional_previous).abs() > self.usd_change_threshold
                    } else {
                        notional_current > self.usd_change_threshold
                    };
                    let category_changed = hot.recommended_category != previous_category;
                    let significant = weight_changed || notional_changed || category_changed;

                    outcomes.push(HotUpdateOutcome {
                        fingerprint: fingerprint.clone(),
                        event: HotEvent::Update(fingerprint),
                        significant,
                    });
                }
            }
        }

        outcomes
    }

    /// Full catalog sorted by recommended weight descending, for
    /// persistence and the Private/VIP fan-out tiers.
    pub fn snapshot_sorted(&self) -> Vec<HotOrder> {
        let inner = self.inner.read();
        let mut orders: Vec<HotOrder> = inner.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.recommended_weight.partial_cmp(&a.recommended_weight).unwrap());
        orders
    }

    /// Counts per recommended category, for the persisted summary.
    pub fn category_counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.read();
        let mut basic = 0;
        let mut gold = 0;
        let mut diamond = 0;
        for order in inner.orders.values() {
            match order.recommended_category {
                crate::types::Category::Basic => basic += 1,
                crate::types::Category::Gold => gold += 1,
                crate::types::Category::Diamond => diamond += 1,
            }
        }
        (basic, gold, diamond)
    }
}

/// Per-symbol market context cache with a TTL and single-flight gating: a
/// symbol's in-flight fetch is serialized behind its own async mutex so
/// concurrent callers wait for, and then reuse, the same refreshed value
/// rather than issuing duplicate venue calls.
pub struct MarketContextCache {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<Symbol, MarketContext>>,
    gates: AsyncMutex<HashMap<Symbol, Arc<AsyncMutex<()>>>>,
}

impl MarketContextCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()), gates: AsyncMutex::new(HashMap::new()) }
    }

    fn fresh(&self, symbol: &str, now: DateTime<Utc>) -> Option<MarketContext> {
        self.entries.read().get(symbol).filter(|c| c.is_fresh(self.ttl, now)).cloned()
    }

    /// Return the cached context for `symbol` if fresh; otherwise run
    /// `fetch` exactly once per stale period even under concurrent callers.
    pub async fn get_or_fetch<F, Fut>(&self, symbol: &str, now: DateTime<Utc>, fetch: F) -> MarketContext
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = MarketContext>,
    {
        if let Some(ctx) = self.fresh(symbol, now) {
            return ctx;
        }

        let gate = {
            let mut gates = self.gates.lock().await;
            gates.entry(symbol.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        let _permit = gate.lock().await;

        if let Some(ctx) = self.fresh(symbol, now) {
            return ctx;
        }

        let mut ctx = fetch().await;
        ctx.fetched_at = Some(now);
        self.entries.write().insert(symbol.to_string(), ctx.clone());
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookEntry, BookSide, Side, WallCandidate};
    use rust_decimal_macros::dec;

    fn precision() -> SymbolPrecision {
        SymbolPrecision { price_decimals: 2, quantity_decimals: 3 }
    }

    fn tracked(symbol: &str, price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> TrackedOrder {
        let candidate = WallCandidate {
            symbol: symbol.to_string(),
            side: Side::Ask,
            price,
            quantity: qty,
            notional: price * qty,
            reference_price: price,
            distance_percent: 0.0,
            size_vs_average: 8.0,
            average_order_size: dec!(1),
            is_round_level: false,
            observed_at: Utc::now(),
        };
        TrackedOrder::from_candidate(format!("{symbol}-hot"), &candidate)
    }

    #[test]
    fn admit_then_reevaluate_with_matching_price_updates() {
        let pool = HotPool::new(0.15, 10_000.0, WeightEngineConfig::default(), "hybrid");
        let fp = pool.admit(tracked("BTCUSDT", dec!(50000), dec!(10)), 61.0, Utc::now());

        let book = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(50000), dec!(9))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let context = MarketContext { fetched_at: Some(Utc::now()), ..Default::default() };
        let outcomes = pool.reevaluate_symbol("BTCUSDT", &book, &precision(), &context, Utc::now());
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0].event, HotEvent::Update(f) if *f == fp));
        assert_eq!(pool.tracked_count(), 1);
    }

    #[test]
    fn disappearance_removes_and_is_always_significant() {
        let pool = HotPool::new(0.15, 10_000.0, WeightEngineConfig::default(), "hybrid");
        pool.admit(tracked("ETHUSDT", dec!(3000), dec!(5)), 61.0, Utc::now());

        let book = OrderBook { asks: BookSide::default(), bids: BookSide::default(), last_update_id: 1 };
        let context = MarketContext { fetched_at: Some(Utc::now()), ..Default::default() };
        let outcomes = pool.reevaluate_symbol("ETHUSDT", &book, &precision(), &context, Utc::now());
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].significant);
        assert!(matches!(&outcomes[0].event, HotEvent::Remove(_)));
        assert_eq!(pool.tracked_count(), 0);
    }

    #[test]
    fn snapshot_sorted_orders_by_recommended_weight_descending() {
        let pool = HotPool::new(0.15, 10_000.0, WeightEngineConfig::default(), "hybrid");
        pool.admit(tracked("BTCUSDT", dec!(50000), dec!(10)), 3600.0, Utc::now());
        pool.admit(tracked("ETHUSDT", dec!(3000), dec!(5)), 10.0, Utc::now());

        let book_btc = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(50000), dec!(10))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let context = MarketContext { fetched_at: Some(Utc::now()), ..Default::default() };
        pool.reevaluate_symbol("BTCUSDT", &book_btc, &precision(), &context, Utc::now());

        let sorted = pool.snapshot_sorted();
        assert_eq!(sorted.len(), 2);
        assert!(sorted[0].recommended_weight >= sorted[1].recommended_weight);
    }

    #[tokio::test]
    async fn market_context_cache_reuses_fresh_entry() {
        let cache = MarketContextCache::new(chrono::Duration::seconds(30));
        let calls = std::sync::atomic::AtomicU32::new(0);
        let now = Utc::now();

        for _ in 0..3 {
            cache
                .get_or_fetch("BTCUSDT", now, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    MarketContext::default()
                })
                .await;
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn market_context_cache_refetches_after_ttl() {
        let cache = MarketContextCache::new(chrono::Duration::seconds(0));
        let calls = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch("BTCUSDT", Utc::now(), || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    MarketContext::default()
                })
                .await;
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
