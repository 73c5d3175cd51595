// =============================================================================
// Exchange capability surface (C1)
// =============================================================================
//
// `ExchangeClient` is the trait every scanner/pool codes against. The only
// shipped implementation is Binance USDⓈ-M futures (`binance.rs`), but the
// trait boundary exists so a second venue plugs in without touching C2-C9.
// =============================================================================

pub mod binance;
pub mod rate_limit;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::PipelineError;
use crate::precision::SymbolPrecision;
use crate::types::{OrderBook, Symbol};

/// 24h ticker statistics for one symbol, used by the universe builder and
/// the top-by-volume ranking.
#[derive(Debug, Clone)]
pub struct TickerStats {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub quote_volume: Decimal,
    pub price_change_percent: f64,
}

/// Minimal venue-facing surface the pipeline needs. Every method maps to a
/// single venue call (or a small, documented handful) so retry/backoff at
/// the call site has a clean unit to retry.
///
/// `#[async_trait]` rather than plain `async fn` in the trait: the pipeline
/// holds this behind `Arc<dyn ExchangeClient>` everywhere (scanners, worker
/// pools, `PipelineContext`), and a trait with native `async fn` methods
/// isn't object-safe.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// All tradable futures symbols, in venue-reported order.
    async fn get_futures_symbols(&self) -> Result<Vec<Symbol>, PipelineError>;

    /// 24h stats for every symbol in one call.
    async fn get_24h_stats(&self) -> Result<Vec<TickerStats>, PipelineError>;

    /// The `limit` symbols with the highest quote volume, derived from
    /// [`get_24h_stats`] and sorted descending.
    async fn get_top_by_quote_volume(&self, limit: usize) -> Result<Vec<Symbol>, PipelineError>;

    /// Full order book for `symbol`, at least `depth` levels per side where
    /// the venue supports it.
    async fn get_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderBook, PipelineError>;

    /// Last traded price, used as the wall detector's reference price.
    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, PipelineError>;

    /// Fractional price volatility over `window` (e.g. `"1h"`, `"24h"`),
    /// computed from recent klines.
    async fn get_volatility(&self, symbol: &str, window: &str) -> Result<f64, PipelineError>;

    /// Venue tick/step precision for `symbol`, cached internally after the
    /// first lookup.
    async fn get_price_precision(&self, symbol: &str) -> Result<SymbolPrecision, PipelineError>;
}
