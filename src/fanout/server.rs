// =============================================================================
// Fan-out server (C9) — three-tier broadcast over WebSocket
// =============================================================================
//
// Private and VIP subscribers share one broadcast channel carrying the full
// projection; VIP connections strip `internal_only` at send time rather than
// the server maintaining two parallel channels, since the two tiers differ
// only in what's withheld, not in timing. Public subscribers get their own
// channel fed by a delay queue: every diamond-category delta is scheduled
// `public_delay` in the future and only then pushed, so Private/VIP latency
// is never coupled to Public's configured lag. Grounded in `api::ws`'s
// upgrade-then-select! pattern and `api::auth`'s constant-time comparison
// (see `fanout::auth`).
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::fanout::auth::resolve_tier;
use crate::types::{AccessTier, Category, HotOrder, HotOrderProjection, InternalFields, PublicProjection};

const BROADCAST_CAPACITY: usize = 1024;

fn build_full_projection(event: &'static str, order: &HotOrder) -> HotOrderProjection {
    let tracked = &order.tracked;
    HotOrderProjection {
        event,
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
        internal_only: InternalFields {
            weights: order.weights.clone(),
            distance_percent: tracked.distance_percent,
            is_round_level: tracked.is_round_level,
        },
    }
}

fn build_public_projection(order: &HotOrder, exchange: &str) -> PublicProjection {
    PublicProjection {
        symbol: order.tracked.symbol.clone(),
        exchange: exchange.to_string(),
        usd_value: order.tracked.current_notional.to_string(),
        lifetime_seconds: order.lifetime_seconds,
        category: order.recommended_category,
        weight: order.recommended_weight,
        market_temperature: order.context.market_temperature,
    }
}

/// Owns the three broadcast channels and the Public-tier delay queue.
/// Cheap to clone (all fields are `Arc`/`Sender`); typically held as a
/// single instance behind `Arc` in the pipeline's shared state.
pub struct FanoutServer {
    full_tx: broadcast::Sender<HotOrderProjection>,
    public_tx: broadcast::Sender<PublicProjection>,
    delay_tx: mpsc::UnboundedSender<(Instant, PublicProjection)>,
    public_delay: Duration,
    exchange_name: String,
}

impl FanoutServer {
    pub fn new(public_delay: Duration, exchange_name: impl Into<String>) -> Arc<Self> {
        let (full_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (public_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (delay_tx, mut delay_rx) = mpsc::unbounded_channel::<(Instant, PublicProjection)>();

        let public_tx_for_drain = public_tx.clone();
        tokio::spawn(async move {
            while let Some((deadline, projection)) = delay_rx.recv().await {
                let now = Instant::now();
                if deadline > now {
                    tokio::time::sleep(deadline - now).await;
                }
                let _ = public_tx_for_drain.send(projection);
            }
        });

        Arc::new(Self {
            full_tx,
            public_tx,
            delay_tx,
            public_delay,
            exchange_name: exchange_name.into(),
        })
    }

    /// Publish a hot-pool state change. `event` is one of `"admit"`,
    /// `"update"`, `"remove"`. Diamond-category orders additionally get a
    /// delayed Public-tier projection; non-diamond orders are invisible to
    /// Public entirely.
    pub fn publish(&self, event: &'static str, order: &HotOrder) {
        let full = build_full_projection(event, order);
        let _ = self.full_tx.send(full);

        if order.recommended_category == Category::Diamond {
            let public = build_public_projection(order, &self.exchange_name);
            let deadline = Instant::now() + self.public_delay;
            let _ = self.delay_tx.send((deadline, public));
        }
    }

    fn subscribe_full(&self) -> broadcast::Receiver<HotOrderProjection> {
        self.full_tx.subscribe()
    }

    fn subscribe_public(&self) -> broadcast::Receiver<PublicProjection> {
        self.public_tx.subscribe()
    }
}

/// Axum-facing configuration the `/ws` route needs beyond the server itself:
/// the tokens that gate Private/VIP, and the delay Public subscribers sit
/// behind.
pub struct FanoutContext {
    pub server: Arc<FanoutServer>,
    pub private_token: String,
    pub vip_token: String,
    pub public_delay: Duration,
}

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

#[derive(Serialize)]
struct Welcome {
    #[serde(rename = "type")]
    msg_type: &'static str,
    access_level: AccessTier,
    rate_limit: Option<u32>,
    data_delay: f64,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    timestamp: chrono::DateTime<Utc>,
    data: &'a T,
    access_level: AccessTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    disclaimer: Option<&'static str>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<FanoutContext>>, Query(query): Query<WsQuery>) -> impl IntoResponse {
    let tier = resolve_tier(query.token.as_deref(), &ctx.private_token, &ctx.vip_token);
    info!(%tier, "fan-out connection accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, ctx, tier))
}

async fn handle_connection(socket: WebSocket, ctx: Arc<FanoutContext>, tier: AccessTier) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = Welcome {
        msg_type: "welcome",
        access_level: tier,
        rate_limit: None,
        data_delay: if tier == AccessTier::Public { ctx.public_delay.as_secs_f64() } else { 0.0 },
    };
    if sender.send(Message::Text(serde_json::to_string(&welcome).unwrap_or_default().into())).await.is_err() {
        return;
    }

    let mut full_rx = ctx.server.subscribe_full();
    let mut public_rx = ctx.server.subscribe_public();

    loop {
        tokio::select! {
            full = full_rx.recv(), if tier != AccessTier::Public => {
                match full {
                    Ok(projection) => {
                        if tier == AccessTier::Vip {
                            if !send_vip(&mut sender, &projection).await {
                                break;
                            }
                        } else if !send_envelope(&mut sender, &projection, tier, None).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, %tier, "fan-out subscriber lagged, dropping missed deltas");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            public = public_rx.recv(), if tier == AccessTier::Public => {
                match public {
                    Ok(projection) => {
                        let disclaimer = Some("Public feed is delayed and limited to diamond-category orders");
                        if !send_envelope(&mut sender, &projection, tier, disclaimer).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, %tier, "fan-out subscriber lagged, dropping missed deltas");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "fan-out receive error, disconnecting");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!(%tier, "fan-out connection closed");
}

async fn send_envelope<T: Serialize>(sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), data: &T, tier: AccessTier, disclaimer: Option<&'static str>) -> bool {
    let envelope = Envelope {
        msg_type: "hot_pool_update",
        timestamp: Utc::now(),
        data,
        access_level: tier,
        disclaimer,
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize fan-out envelope");
            true
        }
    }
}

/// VIP sees the same `HotOrderProjection` shape as Private, minus
/// `internal_only` — stripped here via `serde_json::Value` rather than a
/// second projection type, since the two tiers are otherwise identical.
async fn send_vip(sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), projection: &HotOrderProjection) -> bool {
    let mut value = match serde_json::to_value(projection) {
        Ok(v) => v,
        Err(_) => return true,
    };
    if let Some(obj) = value.as_object_mut() {
        obj.remove("internal_only");
    }
    let envelope = serde_json::json!({
        "type": "hot_pool_update",
        "timestamp": Utc::now(),
        "data": value,
        "access_level": AccessTier::Vip,
    });
    match serde_json::to_string(&envelope) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlgorithmScore, GrowthTrend, MarketContext, OrderState, Side, TrackedOrder, WeightScores};
    use rust_decimal_macros::dec;

    fn zero_score() -> AlgorithmScore {
        AlgorithmScore { weight: 0.0, category: Category::Basic }
    }

    fn sample_order(category: Category) -> HotOrder {
        let tracked = TrackedOrder {
            fingerprint: "fp1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Ask,
            anchor_price: dec!(50000),
            anchor_quantity: dec!(10),
            anchor_notional: dec!(500000),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            scan_count: 5,
            current_quantity: dec!(9),
            current_notional: dec!(450000),
            state: OrderState::Promoted,
            cause_of_death: None,
            size_vs_average: 8.0,
            is_round_level: true,
            distance_percent: 0.1,
        };
        let mut order = HotOrder::admit(tracked, 120.0, Utc::now());
        order.recommended_category = category;
        order.recommended_weight = 0.8;
        order.weights = Some(WeightScores {
            conservative: zero_score(),
            aggressive: zero_score(),
            volume_weighted: zero_score(),
            time_weighted: zero_score(),
            hybrid: zero_score(),
        });
        order.context = MarketContext::default();
        order.growth_trend = GrowthTrend::Inc;
        order
    }

    #[test]
    fn full_projection_carries_internal_fields() {
        let order = sample_order(Category::Diamond);
        let projection = build_full_projection("update", &order);
        assert_eq!(projection.symbol, "BTCUSDT");
        assert!(projection.internal_only.is_round_level);
    }

    #[test]
    fn vip_strip_removes_internal_only_key() {
        let order = sample_order(Category::Diamond);
        let projection = build_full_projection("update", &order);
        let mut value = serde_json::to_value(&projection).unwrap();
        value.as_object_mut().unwrap().remove("internal_only");
        assert!(!value.as_object().unwrap().contains_key("internal_only"));
        assert!(value.as_object().unwrap().contains_key("symbol"));
    }

    #[test]
    fn public_projection_only_built_for_diamond_grade_callers() {
        let order = sample_order(Category::Gold);
        assert_ne!(order.recommended_category, Category::Diamond);
        let order = sample_order(Category::Diamond);
        let projection = build_public_projection(&order, "binance");
        assert_eq!(projection.exchange, "binance");
        assert_eq!(projection.category, Category::Diamond);
    }
}
