//! HTTP route definitions

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::LIVENESS_BODY;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Any origin may open the game socket
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/", get(liveness_handler))
        .route("/health", get(health_handler))
        .route("/game", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoints
// ============================================================================

async fn liveness_handler() -> &'static str {
    LIVENESS_BODY
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    participants: usize,
    tick: u64,
    mode: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        participants: state.world.participant_count(),
        tick: state.world.ticks(),
        mode: state.inputs.mode(),
    })
}
