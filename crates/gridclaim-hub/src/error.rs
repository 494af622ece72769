//! Error types for the realtime layer and its HTTP surface.
//!
//! [`ApiError`] converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation; the other
//! enums stay inside the process and are logged where they surface.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gridclaim_db::DbError;

/// The hub actor is unreachable.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub task has stopped and its mailbox is closed.
    #[error("hub is shut down")]
    Closed,

    /// An event could not be serialized into a frame.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the cross-instance event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// An event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// NATS connection, subscription or publish failed.
    #[error("NATS error: {0}")]
    Nats(String),

    /// The publish did not complete within its deadline.
    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Failures while updating or reconciling presence.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The presence or user store failed.
    #[error("presence store error: {0}")]
    Store(#[from] DbError),

    /// The presence event could not be published.
    #[error("presence publish error: {0}")]
    Bus(#[from] BusError),

    /// The local hub could not be queried.
    #[error("presence hub error: {0}")]
    Hub(#[from] HubError),
}

/// Failures of one leaderboard broadcast.
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    /// The ranking query failed.
    #[error("leaderboard store error: {0}")]
    Store(#[from] DbError),

    /// The update could not be published.
    #[error("leaderboard publish error: {0}")]
    Bus(#[from] BusError),
}

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage collaborator failed.
    #[error("storage error: {0}")]
    Store(#[from] DbError),

    /// The request could not be upgraded to a `WebSocket`.
    #[error("upgrade failed: {0}")]
    Upgrade(#[from] WebSocketUpgradeRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Store(e) => {
                tracing::warn!(error = %e, "Request failed on storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, String::from("internal error"))
            }
            Self::Upgrade(rejection) => (rejection.status(), rejection.body_text()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
