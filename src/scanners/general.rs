// =============================================================================
// General Scanner (C4) — continuous sweep of the symbols C3/C5 aren't
// watching
// =============================================================================
//
// A single long-running loop over whatever part of the universe the observer
// pool doesn't currently own. Any symbol that turns up a large order is
// handed to the observer pool and drops out of this loop's rotation — the
// observer pool's own `owned_symbols()` is the exclusion set, so release
// happens automatically once that order dies or promotes. Grounded in
// `original_source/src/pools/general_pool.py`.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::exchange::ExchangeClient;
use crate::exchange::rate_limit::RateLimiter;
use crate::pools::observer::ObserverPool;
use crate::types::{Side, Symbol};
use crate::wall_detector::find_walls_in_side;

/// Per-cycle inter-symbol pacing, matching the original's small yield
/// between sequential scans within one batch.
const INTER_SYMBOL_DELAY: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The batch this cycle should scan: up to `batch_size` symbols from
/// `universe`, skipping anything the observer pool already owns.
fn symbols_for_cycle(universe: &[Symbol], owned: &HashSet<Symbol>, batch_size: usize) -> Vec<Symbol> {
    universe
        .iter()
        .filter(|s| !owned.contains(*s))
        .take(batch_size)
        .cloned()
        .collect()
}

async fn scan_one_symbol(
    exchange: &dyn ExchangeClient,
    limiter: &RateLimiter,
    symbol: &str,
    orderbook_depth: u32,
    large_order_multiplier: f64,
    observer: &ObserverPool,
) -> usize {
    limiter.acquire().await;
    let book = match exchange.get_orderbook(symbol, orderbook_depth).await {
        Ok(book) => book,
        Err(e) => {
            warn!(symbol, error = %e, "general scan: orderbook fetch failed");
            return 0;
        }
    };

    limiter.acquire().await;
    let reference_price = match exchange.get_last_price(symbol).await {
        Ok(price) => price,
        Err(e) => {
            warn!(symbol, error = %e, "general scan: last price fetch failed");
            return 0;
        }
    };

    let mut candidates = find_walls_in_side(symbol, Side::Ask, &book.asks, reference_price, large_order_multiplier);
    candidates.extend(find_walls_in_side(symbol, Side::Bid, &book.bids, reference_price, large_order_multiplier));

    let found = candidates.len();
    for candidate in candidates {
        observer.ingest(&candidate);
    }
    found
}

/// Run one scan cycle over `universe`, skipping symbols the observer pool
/// already owns, and return how many symbols turned up at least one order
/// (those symbols will fall out of the next cycle's batch once `owned`
/// reflects the ingest).
async fn run_cycle(
    exchange: &dyn ExchangeClient,
    limiter: &RateLimiter,
    observer: &ObserverPool,
    universe: &[Symbol],
    batch_size: usize,
    orderbook_depth: u32,
    large_order_multiplier: f64,
) -> usize {
    let owned: HashSet<Symbol> = observer.owned_symbols().into_iter().collect();
    let batch = symbols_for_cycle(universe, &owned, batch_size);
    let mut symbols_with_orders = 0;
    for symbol in &batch {
        let found = scan_one_symbol(exchange, limiter, symbol, orderbook_depth, large_order_multiplier, observer).await;
        if found > 0 {
            symbols_with_orders += 1;
        }
        tokio::time::sleep(INTER_SYMBOL_DELAY).await;
    }
    symbols_with_orders
}

/// Drive the general scanner forever. `universe` is refreshed by the caller
/// out of band (top-volume symbols first, the rest after) — this loop only
/// reads a snapshot of it each cycle so a universe refresh never blocks a
/// scan in flight.
pub async fn run_forever(
    exchange: Arc<dyn ExchangeClient>,
    limiter: Arc<RateLimiter>,
    observer: Arc<ObserverPool>,
    universe: Arc<parking_lot::RwLock<Vec<Symbol>>>,
    batch_size: usize,
    orderbook_depth: u32,
    large_order_multiplier: f64,
    scan_interval: Duration,
) -> ! {
    loop {
        let universe_snapshot = universe.read().clone();
        if universe_snapshot.is_empty() {
            tokio::time::sleep(ERROR_BACKOFF).await;
            continue;
        }

        let symbols_with_orders = run_cycle(
            exchange.as_ref(),
            limiter.as_ref(),
            observer.as_ref(),
            &universe_snapshot,
            batch_size,
            orderbook_depth,
            large_order_multiplier,
        )
        .await;

        debug!(symbols_with_orders, "general scan cycle complete");
        tokio::time::sleep(scan_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_batch_excludes_owned_symbols_and_respects_batch_size() {
        let universe: Vec<Symbol> = (0..10).map(|i| format!("SYM{i}")).collect();
        let owned: HashSet<Symbol> = ["SYM2".to_string(), "SYM5".to_string()].into_iter().collect();
        let batch = symbols_for_cycle(&universe, &owned, 5);
        assert_eq!(batch.len(), 5);
        assert!(!batch.contains(&"SYM2".to_string()));
        assert!(!batch.contains(&"SYM5".to_string()));
        assert_eq!(batch[0], "SYM0");
    }

    #[test]
    fn cycle_batch_is_empty_when_everything_is_owned() {
        let universe: Vec<Symbol> = vec!["A".into(), "B".into()];
        let owned: HashSet<Symbol> = universe.iter().cloned().collect();
        assert!(symbols_for_cycle(&universe, &owned, 10).is_empty());
    }
}
