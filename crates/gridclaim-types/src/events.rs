//! Outbound event envelopes.
//!
//! Every frame the server sends, and every message carried on the
//! cross-instance bus, is one [`ServerEvent`]. The enum is adjacently
//! tagged so the wire shape is always `{"type": "...", "payload": {...}}`
//! and each variant owns a strongly-typed payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::board::{LeaderboardEntry, Tile, User};
use crate::ids::UserId;

/// A self-contained fact pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ServerEvent {
    /// Full board snapshot sent once to a freshly connected session.
    InitBoard(InitBoardPayload),
    /// A claim was accepted somewhere in the cluster.
    TileClaimed(TileClaimedPayload),
    /// A claim by this connection was refused.
    ClaimRejected(ClaimRejectedPayload),
    /// A user opened a connection.
    UserJoined(UserJoinedPayload),
    /// A user's connection was torn down.
    UserLeft(UserLeftPayload),
    /// Periodic leaderboard refresh.
    LeaderboardUpdate(LeaderboardUpdatePayload),
    /// A malformed or unknown inbound frame.
    Error(ErrorPayload),
    /// Reply to an application-level `PING`.
    Pong(PongPayload),
}

impl ServerEvent {
    /// The wire tag of this event.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::InitBoard(_) => "INIT_BOARD",
            Self::TileClaimed(_) => "TILE_CLAIMED",
            Self::ClaimRejected(_) => "CLAIM_REJECTED",
            Self::UserJoined(_) => "USER_JOINED",
            Self::UserLeft(_) => "USER_LEFT",
            Self::LeaderboardUpdate(_) => "LEADERBOARD_UPDATE",
            Self::Error(_) => "ERROR",
            Self::Pong(_) => "PONG",
        }
    }

    /// Serialize into the JSON text of one frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of [`ServerEvent::InitBoard`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct InitBoardPayload {
    /// Every tile ordered by id.
    pub tiles: Vec<Tile>,
    /// The connecting user.
    pub user: User,
    /// Size of the shared online set after this user joined.
    #[ts(type = "number")]
    pub online_count: u64,
    /// Grid columns.
    pub grid_width: u32,
    /// Grid rows.
    pub grid_height: u32,
}

/// Payload of [`ServerEvent::TileClaimed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TileClaimedPayload {
    /// Claimed tile.
    pub tile_id: i32,
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// New owner.
    pub user_id: UserId,
    /// New owner's display name.
    pub username: String,
    /// New owner's display color.
    pub color: String,
    /// Commit time of the claim.
    pub claimed_at: DateTime<Utc>,
    /// Always `null`: ownership never transfers twice.
    pub previous_owner: Option<UserId>,
}

/// Why a claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum RejectReason {
    /// Tile id outside `[0, width * height)`.
    InvalidTile,
    /// The tile already has an owner (or does not exist in the store).
    AlreadyClaimed,
    /// A dependency failed or timed out.
    ServerError,
}

/// Payload of [`ServerEvent::ClaimRejected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ClaimRejectedPayload {
    /// The tile id exactly as requested.
    #[ts(type = "number")]
    pub tile_id: i64,
    /// Rejection reason.
    pub reason: RejectReason,
}

/// Payload of [`ServerEvent::UserJoined`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UserJoinedPayload {
    /// Joining user.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Online count including this user.
    #[ts(type = "number")]
    pub online_count: u64,
}

/// Payload of [`ServerEvent::UserLeft`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UserLeftPayload {
    /// Departing user.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Online count after removal.
    #[ts(type = "number")]
    pub online_count: u64,
}

/// Payload of [`ServerEvent::LeaderboardUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LeaderboardUpdatePayload {
    /// Top entries, best first.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Machine-readable code of an [`ErrorPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ErrorCode {
    /// The frame was not a JSON envelope.
    BadFrame,
    /// The envelope `type` is not one the server accepts.
    UnknownMessage,
    /// The envelope payload did not match its `type`.
    BadPayload,
}

/// Payload of [`ServerEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ErrorPayload {
    /// Error class.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Payload of [`ServerEvent::Pong`]; always `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PongPayload {}
