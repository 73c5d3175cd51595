// =============================================================================
// Observer Pool (C5) — TrackedOrder lifecycle: ingest, survive, promote, die
// =============================================================================
//
// Owns every `Live` `TrackedOrder` keyed by fingerprint, plus a symbol ->
// fingerprint-set index so a scan of one symbol only touches the orders
// that live there. Promotion and death are terminal: once an order leaves
// this pool (either direction) it never re-enters under the same
// fingerprint.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::precision::SymbolPrecision;
use crate::types::{
    mint_fingerprint, CauseOfDeath, Fingerprint, ObserverEvent, OrderBook, OrderState, Side,
    Symbol, TrackedOrder, WallCandidate,
};

struct Inner {
    orders: HashMap<Fingerprint, TrackedOrder>,
    by_symbol: HashMap<Symbol, HashSet<Fingerprint>>,
    /// Consecutive empty scans for a symbol once its order set first goes
    /// empty. Incremented inline by `scan_symbol`, never by a background
    /// task — see the pool-level docs on why.
    empty_scan_counts: HashMap<Symbol, u32>,
}

/// Tracks resting orders between their first sighting (by C3/C4) and their
/// terminal transition to promoted or dead.
pub struct ObserverPool {
    inner: RwLock<Inner>,
    survival_threshold: f64,
    promotion_lifetime_secs: f64,
    cleanup_empty_scans: u32,
}

impl ObserverPool {
    pub fn new(survival_threshold: f64, promotion_lifetime_secs: f64, cleanup_empty_scans: u32) -> Self {
        Self {
            inner: RwLock::new(Inner {
                orders: HashMap::new(),
                by_symbol: HashMap::new(),
                empty_scan_counts: HashMap::new(),
            }),
            survival_threshold,
            promotion_lifetime_secs,
            cleanup_empty_scans,
        }
    }

    /// Begin tracking a freshly detected wall. No-op if an identical
    /// (symbol, side, price, quantity) order is already live — callers
    /// dedupe against the primary/general scanners' own per-cycle output,
    /// this only guards the pool's own invariant.
    pub fn ingest(&self, candidate: &WallCandidate) -> Fingerprint {
        let fingerprint = mint_fingerprint(
            &candidate.symbol,
            candidate.side,
            candidate.price,
            candidate.quantity,
        );
        let tracked = TrackedOrder::from_candidate(fingerprint.clone(), candidate);

        let mut inner = self.inner.write();
        inner
            .by_symbol
            .entry(candidate.symbol.clone())
            .or_default()
            .insert(fingerprint.clone());
        inner.empty_scan_counts.remove(&candidate.symbol);
        inner.orders.insert(fingerprint.clone(), tracked);
        fingerprint
    }

    /// All symbols this pool currently owns orders for (i.e. the set
    /// general/primary scanners must not also scan).
    pub fn owned_symbols(&self) -> Vec<Symbol> {
        self.inner
            .read()
            .by_symbol
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Re-evaluate every tracked order on `symbol` against a freshly
    /// fetched order book. If `symbol` has no tracked orders at all this is
    /// an empty scan: the cleanup counter for it increments right here,
    /// inline with this call, and once it reaches `cleanup_empty_scans`
    /// the symbol's bookkeeping entry is dropped so it stops being
    /// reported as owned.
    pub fn scan_symbol(
        &self,
        symbol: &str,
        book: &OrderBook,
        precision: &SymbolPrecision,
        now: DateTime<Utc>,
    ) -> Vec<ObserverEvent> {
        let mut inner = self.inner.write();

        let fingerprints: Vec<Fingerprint> = inner
            .by_symbol
            .get(symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        if fingerprints.is_empty() {
            let count = inner.empty_scan_counts.entry(symbol.to_string()).or_insert(0);
            *count += 1;
            if *count >= self.cleanup_empty_scans {
                inner.empty_scan_counts.remove(symbol);
                inner.by_symbol.remove(symbol);
            }
            return Vec::new();
        }

        let mut events = Vec::new();
        for fingerprint in fingerprints {
            let Some(order) = inner.orders.get(&fingerprint) else {
                continue;
            };
            if order.state != OrderState::Live {
                continue;
            }

            let side = book.side(order.side);
            let found = side
                .entries
                .iter()
                .find(|entry| precision.prices_equal(entry.price, order.anchor_price));

            match found {
                Some(entry) => {
                    let order = inner.orders.get_mut(&fingerprint).unwrap();
                    order.current_quantity = entry.quantity;
                    order.current_notional = entry.notional();
                    order.last_seen = now;
                    order.scan_count += 1;

                    let ratio = order.survival_ratio();
                    if ratio < self.survival_threshold {
                        order.state = OrderState::Dead;
                        order.cause_of_death = Some(CauseOfDeath::VolumeLoss);
                        events.push(ObserverEvent::Die(fingerprint.clone(), CauseOfDeath::VolumeLoss));
                        Self::remove_locked(&mut inner, &fingerprint, symbol);
                        continue;
                    }

                    let lifetime = order.lifetime(now).num_milliseconds() as f64 / 1000.0;
                    if lifetime >= self.promotion_lifetime_secs {
                        let promoted = order.clone();
                        order.state = OrderState::Promoted;
                        events.push(ObserverEvent::Promote(promoted, lifetime));
                        Self::remove_locked(&mut inner, &fingerprint, symbol);
                        continue;
                    }

                    events.push(ObserverEvent::Update(fingerprint));
                }
                None => {
                    let order = inner.orders.get_mut(&fingerprint).unwrap();
                    order.state = OrderState::Dead;
                    order.cause_of_death = Some(CauseOfDeath::Disappeared);
                    events.push(ObserverEvent::Die(fingerprint.clone(), CauseOfDeath::Disappeared));
                    Self::remove_locked(&mut inner, &fingerprint, symbol);
                }
            }
        }

        inner.empty_scan_counts.remove(symbol);
        events
    }

    fn remove_locked(inner: &mut Inner, fingerprint: &Fingerprint, symbol: &str) {
        inner.orders.remove(fingerprint);
        if let Some(set) = inner.by_symbol.get_mut(symbol) {
            set.remove(fingerprint);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.read().orders.len()
    }

    pub fn get(&self, fingerprint: &str) -> Option<TrackedOrder> {
        self.inner.read().orders.get(fingerprint).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookEntry, BookSide};
    use rust_decimal_macros::dec;

    fn precision() -> SymbolPrecision {
        SymbolPrecision {
            price_decimals: 2,
            quantity_decimals: 3,
        }
    }

    fn candidate(symbol: &str, price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> WallCandidate {
        WallCandidate {
            symbol: symbol.to_string(),
            side: Side::Ask,
            price,
            quantity: qty,
            notional: price * qty,
            reference_price: price,
            distance_percent: 0.0,
            size_vs_average: 6.0,
            average_order_size: dec!(1),
            is_round_level: false,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn ingest_then_scan_with_matching_price_updates() {
        let pool = ObserverPool::new(0.7, 60.0, 10);
        let fp = pool.ingest(&candidate("BTCUSDT", dec!(50000), dec!(10)));

        let book = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(50000), dec!(9))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let events = pool.scan_symbol("BTCUSDT", &book, &precision(), Utc::now());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ObserverEvent::Update(ref f) if *f == fp));
    }

    #[test]
    fn disappearance_marks_dead_and_removes() {
        let pool = ObserverPool::new(0.7, 60.0, 10);
        pool.ingest(&candidate("ETHUSDT", dec!(3000), dec!(10)));

        let book = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(3500), dec!(1))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let events = pool.scan_symbol("ETHUSDT", &book, &precision(), Utc::now());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ObserverEvent::Die(_, CauseOfDeath::Disappeared)));
        assert_eq!(pool.tracked_count(), 0);
    }

    #[test]
    fn volume_loss_below_survival_threshold_dies() {
        let pool = ObserverPool::new(0.7, 60.0, 10);
        pool.ingest(&candidate("ETHUSDT", dec!(3000), dec!(10)));

        let book = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(3000), dec!(2))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let events = pool.scan_symbol("ETHUSDT", &book, &precision(), Utc::now());
        assert!(matches!(events[0], ObserverEvent::Die(_, CauseOfDeath::VolumeLoss)));
    }

    #[test]
    fn empty_scan_counter_increments_inline_and_eventually_releases_symbol() {
        let pool = ObserverPool::new(0.7, 60.0, 3);
        pool.ingest(&candidate("XRPUSDT", dec!(1), dec!(100)));
        // Kill it immediately.
        let book = OrderBook::default();
        pool.scan_symbol("XRPUSDT", &book, &precision(), Utc::now());
        assert!(pool.owned_symbols().is_empty());

        // Further empty scans of the now-orderless symbol increment the
        // counter until cleanup drops the bookkeeping entry.
        for _ in 0..3 {
            pool.scan_symbol("XRPUSDT", &book, &precision(), Utc::now());
        }
        assert!(!pool.inner.read().empty_scan_counts.contains_key("XRPUSDT"));
    }

    #[test]
    fn promotion_after_lifetime_threshold() {
        let pool = ObserverPool::new(0.7, 0.0, 10);
        let fp = pool.ingest(&candidate("BTCUSDT", dec!(50000), dec!(10)));
        let book = OrderBook {
            asks: BookSide { entries: vec![BookEntry::new(dec!(50000), dec!(10))] },
            bids: BookSide::default(),
            last_update_id: 1,
        };
        let events = pool.scan_symbol("BTCUSDT", &book, &precision(), Utc::now());
        assert!(matches!(&events[0], ObserverEvent::Promote(order, _) if order.fingerprint == fp));
    }
}
