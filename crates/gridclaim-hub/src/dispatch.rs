//! Inbound message handling for one session.
//!
//! Replies (`PONG`, `ERROR`, `CLAIM_REJECTED`) go only to the originating
//! session. Accepted claims are published on the bus so every process,
//! this one included, broadcasts the same `TILE_CLAIMED` envelope.

use std::time::Duration;

use chrono::Utc;
use gridclaim_core::{ClaimError, ClaimResolver};
use gridclaim_types::{
    ClaimRejectedPayload, ClientMessage, ErrorPayload, PongPayload, RejectReason, ServerEvent,
    Tile, TileClaimedPayload, User,
};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::HubError;
use crate::hub::{HubHandle, SessionId};

/// Routes parsed client messages to the resolver and the hub.
#[derive(Clone)]
pub struct Dispatcher {
    resolver: ClaimResolver,
    hub: HubHandle,
    bus: EventBus,
    claim_timeout: Duration,
}

impl Dispatcher {
    /// Build a dispatcher.
    pub const fn new(
        resolver: ClaimResolver,
        hub: HubHandle,
        bus: EventBus,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            hub,
            bus,
            claim_timeout,
        }
    }

    /// Handle one inbound text frame from `session_id`, owned by `user`.
    ///
    /// Only a stopped hub is reported as an error; everything else is
    /// answered on the socket.
    pub async fn handle_text(
        &self,
        session_id: SessionId,
        user: &User,
        text: &str,
    ) -> Result<(), HubError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %session_id, code = ?e.code(), error = %e, "Rejected inbound frame");
                let reply = ServerEvent::Error(ErrorPayload {
                    code: e.code(),
                    message: e.to_string(),
                });
                return self.hub.send_to_session(session_id, &reply).await;
            }
        };

        match message {
            ClientMessage::Ping => {
                self.hub.heartbeat(session_id).await?;
                self.hub
                    .send_to_session(session_id, &ServerEvent::Pong(PongPayload {}))
                    .await
            }
            ClientMessage::ClaimTile { tile_id } => self.claim(session_id, user, tile_id).await,
        }
    }

    async fn claim(&self, session_id: SessionId, user: &User, tile_id: i64) -> Result<(), HubError> {
        let outcome = tokio::time::timeout(self.claim_timeout, self.resolver.claim(tile_id, user.id)).await;
        let reason = match outcome {
            Ok(Ok(tile)) => {
                self.announce(tile_claimed(&tile, user)).await?;
                return Ok(());
            }
            Ok(Err(e)) => {
                match &e {
                    ClaimError::Store(_) => {
                        warn!(tile_id, user_id = %user.id, error = %e, "Claim failed");
                    }
                    ClaimError::InvalidTile { .. } | ClaimError::AlreadyClaimed(_) => {
                        debug!(tile_id, user_id = %user.id, reason = ?e.reason(), "Claim rejected");
                    }
                }
                e.reason()
            }
            Err(_elapsed) => {
                warn!(tile_id, user_id = %user.id, timeout_ms = self.claim_timeout.as_millis(), "Claim timed out");
                RejectReason::ServerError
            }
        };

        let reply = ServerEvent::ClaimRejected(ClaimRejectedPayload { tile_id, reason });
        self.hub.send_to_session(session_id, &reply).await
    }

    /// Publish on the bus. If the bus is down the ownership change is
    /// already committed, so viewers on this process still get it directly.
    async fn announce(&self, event: ServerEvent) -> Result<(), HubError> {
        if let Err(e) = self.bus.publish(&event).await {
            warn!(error = %e, "Bus publish failed; broadcasting locally only");
            return self.hub.broadcast(&event).await;
        }
        Ok(())
    }
}

fn tile_claimed(tile: &Tile, user: &User) -> ServerEvent {
    ServerEvent::TileClaimed(TileClaimedPayload {
        tile_id: tile.id,
        x: tile.x,
        y: tile.y,
        user_id: user.id,
        username: tile
            .owner_username
            .clone()
            .unwrap_or_else(|| user.username.clone()),
        color: tile.owner_color.clone().unwrap_or_else(|| user.color.clone()),
        claimed_at: tile.claimed_at.unwrap_or_else(Utc::now),
        previous_owner: None,
    })
}
