// =============================================================================
// Domain Types — wall candidates, tracked orders, hot orders, market context
// =============================================================================
//
// Every value that crosses a component boundary is a tagged, typed variant
// rather than a loose map.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Venue-native trading pair, e.g. `"BTCUSDT"`.
pub type Symbol = String;

/// Which side of the book an entry/candidate/order lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Ask,
    Bid,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Ask => "ASK",
            Side::Bid => "BID",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single resting-order entry on one side of a book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookEntry {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl BookEntry {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// One side of an order book, best price first.
#[derive(Debug, Clone, Default)]
pub struct BookSide {
    pub entries: Vec<BookEntry>,
}

/// A full order-book snapshot as returned by an `ExchangeClient`.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub asks: BookSide,
    pub bids: BookSide,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        }
    }
}

/// Emitted by the wall detector (C2). Stateless — no identity of its own.
#[derive(Debug, Clone)]
pub struct WallCandidate {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub reference_price: Decimal,
    pub distance_percent: f64,
    pub size_vs_average: f64,
    pub average_order_size: Decimal,
    pub is_round_level: bool,
    pub observed_at: DateTime<Utc>,
}

/// Opaque process-local identity of a tracked order. Distinct from any
/// venue order id, which is never available to an external observer.
pub type Fingerprint = String;

/// Mint a new fingerprint for a (symbol, side, price, quantity) candidate at
/// the instant it is first ingested. Two candidates with identical
/// (symbol, side, price, quantity) minted at different times are different
/// fingerprints — a resurrection, not a continuation.
pub fn mint_fingerprint(symbol: &str, side: Side, price: Decimal, quantity: Decimal) -> Fingerprint {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    side.to_string().hash(&mut hasher);
    price.to_string().hash(&mut hasher);
    quantity.to_string().hash(&mut hasher);
    Utc::now().timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
    uuid::Uuid::new_v4().hash(&mut hasher);
    let digest = hasher.finish();

    let prefix: String = symbol.chars().take(6).collect();
    format!("{prefix}-{digest:012x}")
}

/// Why a `TrackedOrder` died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CauseOfDeath {
    Disappeared,
    VolumeLoss,
}

impl fmt::Display for CauseOfDeath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CauseOfDeath::Disappeared => write!(f, "disappeared"),
            CauseOfDeath::VolumeLoss => write!(f, "volume_loss"),
        }
    }
}

/// The state an observed order occupies. Transitions to `Promoted`/`Dead`
/// are terminal: an order in either state never re-enters `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Live,
    Promoted,
    Dead,
}

/// A resting order under lifecycle tracking by the observer pool (C5).
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub fingerprint: Fingerprint,
    pub symbol: Symbol,
    pub side: Side,
    pub anchor_price: Decimal,
    pub anchor_quantity: Decimal,
    pub anchor_notional: Decimal,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub scan_count: u32,
    pub current_quantity: Decimal,
    pub current_notional: Decimal,
    pub state: OrderState,
    pub cause_of_death: Option<CauseOfDeath>,
    pub size_vs_average: f64,
    pub is_round_level: bool,
    pub distance_percent: f64,
}

impl TrackedOrder {
    pub fn from_candidate(fingerprint: Fingerprint, candidate: &WallCandidate) -> Self {
        let now = candidate.observed_at;
        Self {
            fingerprint,
            symbol: candidate.symbol.clone(),
            side: candidate.side,
            anchor_price: candidate.price,
            anchor_quantity: candidate.quantity,
            anchor_notional: candidate.notional,
            first_seen: now,
            last_seen: now,
            scan_count: 1,
            current_quantity: candidate.quantity,
            current_notional: candidate.notional,
            state: OrderState::Live,
            cause_of_death: None,
            size_vs_average: candidate.size_vs_average,
            is_round_level: candidate.is_round_level,
            distance_percent: candidate.distance_percent,
        }
    }

    pub fn lifetime(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.first_seen
    }

    /// `current_quantity / anchor_quantity`, as an f64. A zero anchor is
    /// treated as already-dead rather than dividing by zero.
    pub fn survival_ratio(&self) -> f64 {
        if self.anchor_quantity.is_zero() {
            return 0.0;
        }
        let ratio = self.current_quantity / self.anchor_quantity;
        ratio.to_string().parse().unwrap_or(0.0)
    }
}

/// One historical observation of a `HotOrder`, kept in a bounded ring to
/// derive growth trend and stability.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub at: DateTime<Utc>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub distance_percent: f64,
}

/// Coarse volatility classification used to scale promotion speed and the
/// market-wide volatility modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTemperature {
    Cold,
    Warm,
    Hot,
    Extreme,
}

impl MarketTemperature {
    /// Classify from 1h volatility (fractional, e.g. 0.05 = 5%).
    pub fn from_volatility_1h(vol_1h: f64) -> Self {
        if vol_1h > 0.10 {
            MarketTemperature::Extreme
        } else if vol_1h > 0.05 {
            MarketTemperature::Hot
        } else if vol_1h < 0.01 {
            MarketTemperature::Cold
        } else {
            MarketTemperature::Warm
        }
    }

    /// Multiplier used by the `adaptive_market` time factor: hotter markets
    /// promote faster along that one factor.
    pub fn time_factor_scale(&self) -> f64 {
        match self {
            MarketTemperature::Cold => 2.0,
            MarketTemperature::Warm => 1.0,
            MarketTemperature::Hot => 0.5,
            MarketTemperature::Extreme => 0.25,
        }
    }
}

impl fmt::Display for MarketTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketTemperature::Cold => "cold",
            MarketTemperature::Warm => "warm",
            MarketTemperature::Hot => "hot",
            MarketTemperature::Extreme => "extreme",
        };
        write!(f, "{s}")
    }
}

/// Lazily refreshed, TTL-cached per-symbol market context (owned by C6).
#[derive(Debug, Clone, Serialize)]
pub struct MarketContext {
    pub volatility_1h: f64,
    pub volatility_24h: f64,
    pub market_temperature: MarketTemperature,
    pub time_of_day_factor: f64,
    pub day_of_week_factor: f64,
    #[serde(skip)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            volatility_1h: 0.0,
            volatility_24h: 0.0,
            market_temperature: MarketTemperature::Warm,
            time_of_day_factor: 1.0,
            day_of_week_factor: 1.0,
            fetched_at: None,
        }
    }
}

impl MarketContext {
    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            Some(t) => now - t < ttl,
            None => false,
        }
    }
}

/// Directional trend derived from the last three notional snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthTrend {
    Inc,
    Dec,
    Stable,
}

impl fmt::Display for GrowthTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GrowthTrend::Inc => "INC",
            GrowthTrend::Dec => "DEC",
            GrowthTrend::Stable => "STABLE",
        };
        write!(f, "{s}")
    }
}

/// Category an algorithm's weight falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Basic,
    Gold,
    Diamond,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Basic => "basic",
            Category::Gold => "gold",
            Category::Diamond => "diamond",
        };
        write!(f, "{s}")
    }
}

/// Categorize a weight in `[0, 1]` into its semi-open-interval bucket.
/// Boundary values fall into the upper category.
pub fn categorize(weight: f64) -> Category {
    if weight < 0.333 {
        Category::Basic
    } else if weight < 0.666 {
        Category::Gold
    } else {
        Category::Diamond
    }
}

/// Output of the weight engine (C7) for one algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmScore {
    pub weight: f64,
    pub category: Category,
}

/// Full weight-engine output across every shipped algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct WeightScores {
    pub conservative: AlgorithmScore,
    pub aggressive: AlgorithmScore,
    pub volume_weighted: AlgorithmScore,
    pub time_weighted: AlgorithmScore,
    pub hybrid: AlgorithmScore,
}

impl WeightScores {
    /// The alias chosen by configuration to represent "the" weight/category.
    pub fn recommended(&self, algorithm: &str) -> &AlgorithmScore {
        match algorithm {
            "conservative" => &self.conservative,
            "aggressive" => &self.aggressive,
            "volume_weighted" => &self.volume_weighted,
            "time_weighted" => &self.time_weighted,
            _ => &self.hybrid,
        }
    }
}

/// Bound on the per-HotOrder snapshot ring.
pub const SNAPSHOT_HISTORY_CAP: usize = 64;

/// A promoted order under re-evaluation by the hot pool (C6).
#[derive(Debug, Clone)]
pub struct HotOrder {
    pub tracked: TrackedOrder,
    pub admitted_at: DateTime<Utc>,
    pub lifetime_seconds: f64,
    pub history: VecDeque<Snapshot>,
    pub context: MarketContext,
    pub weights: Option<WeightScores>,
    pub recommended_weight: f64,
    pub recommended_category: Category,
    pub growth_trend: GrowthTrend,
    pub stability_score: f64,
    pub scan_count: u32,
}

impl HotOrder {
    pub fn admit(tracked: TrackedOrder, lifetime_seconds: f64, now: DateTime<Utc>) -> Self {
        let mut history = VecDeque::with_capacity(SNAPSHOT_HISTORY_CAP);
        history.push_back(Snapshot {
            at: now,
            price: tracked.anchor_price,
            quantity: tracked.current_quantity,
            notional: tracked.current_notional,
            distance_percent: tracked.distance_percent,
        });
        let scan_count = tracked.scan_count;
        Self {
            tracked,
            admitted_at: now,
            lifetime_seconds,
            history,
            context: MarketContext::default(),
            weights: None,
            recommended_weight: 0.0,
            recommended_category: Category::Basic,
            growth_trend: GrowthTrend::Stable,
            stability_score: 1.0,
            scan_count,
        }
    }

    pub fn push_snapshot(&mut self, snapshot: Snapshot) {
        self.history.push_back(snapshot);
        while self.history.len() > SNAPSHOT_HISTORY_CAP {
            self.history.pop_front();
        }
    }
}

/// Typed event the observer pool (C5) emits across its boundary.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Ingest(Fingerprint),
    Update(Fingerprint),
    Promote(TrackedOrder, f64),
    Die(Fingerprint, CauseOfDeath),
}

/// Typed event the hot pool (C6) emits across its boundary.
#[derive(Debug, Clone)]
pub enum HotEvent {
    Admit(Fingerprint),
    Update(Fingerprint),
    Remove(Fingerprint),
}

/// Fan-out tier a subscriber belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    Private,
    Vip,
    Public,
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessTier::Private => "private",
            AccessTier::Vip => "vip",
            AccessTier::Public => "public",
        };
        write!(f, "{s}")
    }
}

/// Fields tagged internal-only — present for Private, stripped for VIP.
#[derive(Debug, Clone, Serialize)]
pub struct InternalFields {
    pub weights: Option<WeightScores>,
    pub distance_percent: f64,
    pub is_round_level: bool,
}

/// Full, serializable projection of a HotOrder (Private tier; VIP strips
/// `internal_only` at serialization time in `fanout::server`).
#[derive(Debug, Clone, Serialize)]
pub struct HotOrderProjection {
    pub event: &'static str,
    pub fingerprint: Fingerprint,
    pub symbol: Symbol,
    pub side: Side,
    pub anchor_price: String,
    pub current_quantity: String,
    pub current_notional: String,
    pub lifetime_seconds: f64,
    pub scan_count: u32,
    pub growth_trend: GrowthTrend,
    pub stability_score: f64,
    pub recommended_weight: f64,
    pub recommended_category: Category,
    pub market_temperature: MarketTemperature,
    pub internal_only: InternalFields,
}

/// Minimal Public-tier projection: diamond-only, delayed, coarse.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProjection {
    pub symbol: Symbol,
    pub exchange: String,
    pub usd_value: String,
    pub lifetime_seconds: f64,
    pub category: Category,
    pub weight: f64,
    pub market_temperature: MarketTemperature,
}

/// A broadcast-ready delta describing a hot-pool state change. `Full`
/// carries the entire HotOrder projection (Private/VIP); `Projected` carries
/// the minimal Public-tier fields.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "shape")]
pub enum BroadcastDelta {
    Full(HotOrderProjection),
    Projected(PublicProjection),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn categorize_boundaries() {
        assert_eq!(categorize(0.0), Category::Basic);
        assert_eq!(categorize(0.332), Category::Basic);
        assert_eq!(categorize(0.333), Category::Gold);
        assert_eq!(categorize(0.665), Category::Gold);
        assert_eq!(categorize(0.666), Category::Diamond);
        assert_eq!(categorize(1.0), Category::Diamond);
    }

    fn sample_candidate() -> WallCandidate {
        WallCandidate {
            symbol: "BTCUSDT".into(),
            side: Side::Ask,
            price: dec!(50000),
            quantity: dec!(10),
            notional: dec!(500000),
            reference_price: dec!(50000),
            distance_percent: 0.0,
            size_vs_average: 5.0,
            average_order_size: dec!(2),
            is_round_level: false,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn survival_ratio_handles_zero_anchor() {
        let candidate = sample_candidate();
        let mut order = TrackedOrder::from_candidate("BTCUSDT-000".into(), &candidate);
        order.anchor_quantity = dec!(0);
        assert_eq!(order.survival_ratio(), 0.0);
    }

    #[test]
    fn snapshot_ring_respects_cap() {
        let candidate = sample_candidate();
        let order = TrackedOrder::from_candidate("ETHUSDT-001".into(), &candidate);
        let mut hot = HotOrder::admit(order, 61.0, Utc::now());
        for _ in 0..(SNAPSHOT_HISTORY_CAP + 20) {
            hot.push_snapshot(Snapshot {
                at: Utc::now(),
                price: dec!(3000),
                quantity: dec!(100),
                notional: dec!(300000),
                distance_percent: 0.0,
            });
        }
        assert_eq!(hot.history.len(), SNAPSHOT_HISTORY_CAP);
    }
}
