//! `WebSocket` entry point.
//!
//! `GET /ws?userId=<uuid>` resolves the user before upgrading, so a bad or
//! unknown id is answered with a plain HTTP error instead of an open
//! socket. Token validation happens upstream of this service.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::StreamExt as _;
use gridclaim_types::UserId;
use tracing::debug;

use crate::error::ApiError;
use crate::session;
use crate::state::AppState;

/// Query parameters for `GET /ws`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    /// The connecting user.
    pub user_id: Option<String>,
}

/// Resolve the user, then upgrade and hand the socket to a session.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_board(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let raw = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest(String::from("missing userId")))?;
    let user_id: UserId = raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid userId {raw:?}: {e}")))?;
    let user = state
        .tiles
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {user_id}")))?;

    let max_frame = state.session.max_frame_bytes;
    let response = upgrade?
        .max_frame_size(max_frame)
        .max_message_size(max_frame)
        .on_upgrade(move |socket| {
            debug!(user_id = %user.id, "WebSocket upgraded");
            let (sink, stream) = socket.split();
            session::serve(state, user, sink, stream)
        })
        .into_response();
    Ok(response)
}
