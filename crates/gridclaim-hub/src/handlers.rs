//! REST endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe |
//! | `GET` | `/api/board` | Every tile plus grid dimensions |
//! | `GET` | `/api/stats` | Aggregate board statistics |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gridclaim_core::board;
use gridclaim_types::{BoardSnapshot, BoardStats};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /health`
#[allow(clippy::unused_async)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/board`
pub async fn get_board(State(state): State<Arc<AppState>>) -> Result<Json<BoardSnapshot>, ApiError> {
    Ok(Json(board::board_snapshot(&state.tiles, state.grid).await?))
}

/// `GET /api/stats`
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<BoardStats>, ApiError> {
    Ok(Json(board::board_stats(&state.tiles, &state.hot, state.grid).await?))
}
