//! Axum router construction.
//!
//! Assembles the socket route and the REST routes into a single
//! [`Router`] with CORS limited to the configured client origin.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router.
///
/// - `GET /ws` -- realtime board socket
/// - `GET /health` -- liveness probe
/// - `GET /api/board` -- full board
/// - `GET /api/stats` -- board statistics
///
/// `client_origin` of `*` allows any origin.
pub fn build_router(state: Arc<AppState>, client_origin: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(client_origin))
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_board))
        .route("/health", get(handlers::health))
        .route("/api/board", get(handlers::get_board))
        .route("/api/stats", get(handlers::get_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allow_origin(client_origin: &str) -> AllowOrigin {
    if client_origin == "*" {
        return AllowOrigin::any();
    }
    HeaderValue::from_str(client_origin).map_or_else(
        |e| {
            warn!(client_origin, error = %e, "Invalid client origin; cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        },
        AllowOrigin::exact,
    )
}
