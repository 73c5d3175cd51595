// =============================================================================
// REST surface (A-api) — /health and /stats, plus the /ws mount point
// =============================================================================
//
// Both endpoints are public (no auth, no tier): `/health` is a liveness
// probe, `/stats` is an operational summary, not a data feed — the tiered
// fan-out contract only governs hot-order data itself. Grounded in the
// teacher's `api/rest.rs` router/CORS shape, trimmed to the two read-only
// endpoints this pipeline actually needs.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::PipelineContext;
use crate::fanout::server::{ws_handler, FanoutContext};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

async fn health(State(ctx): State<Arc<PipelineContext>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", uptime_seconds: ctx.uptime_seconds() })
}

async fn stats(State(ctx): State<Arc<PipelineContext>>) -> Json<crate::app_state::StatsSnapshot> {
    Json(ctx.build_stats())
}

/// Build the pipeline's REST + WebSocket router. The two state types differ
/// (`PipelineContext` for REST, `FanoutContext` for `/ws`) so each route
/// group carries its own `with_state`, merged at the end — axum supports
/// per-route state this way as long as the final router has no unresolved
/// state left.
pub fn router(pipeline: Arc<PipelineContext>, fanout: Arc<FanoutContext>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let rest = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(pipeline);

    let ws = Router::new().route("/ws", get(ws_handler)).with_state(fanout);

    rest.merge(ws).layer(cors)
}
