//! Board entities: tiles, users, leaderboard rows and aggregate statistics.
//!
//! All structs serialize with `camelCase` field names, which is the shape
//! the browser client consumes both over the socket and from the REST
//! endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::UserId;

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// A single addressable cell of the grid.
///
/// `owner_id` transitions from `None` to `Some` exactly once and never
/// reverts. The owner display attributes are joined from the user record
/// whenever a tile is read, so they are absent for unclaimed tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Tile {
    /// Dense tile index, `y * width + x`.
    pub id: i32,
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Owning user, once claimed.
    pub owner_id: Option<UserId>,
    /// When the tile was claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Owner's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_username: Option<String>,
    /// Owner's display color (`#rrggbb`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_color: Option<String>,
}

impl Tile {
    /// An unowned tile at the given coordinates.
    pub const fn unclaimed(id: i32, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            owner_id: None,
            claimed_at: None,
            owner_username: None,
            owner_color: None,
        }
    }

    /// Whether the tile has an owner.
    pub const fn is_claimed(&self) -> bool {
        self.owner_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered player as seen by the realtime layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct User {
    /// Identity.
    pub id: UserId,
    /// Display name, unique across the board.
    pub username: String,
    /// Display color (`#rrggbb`).
    pub color: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last time the user opened a realtime connection.
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Leaderboard
// ---------------------------------------------------------------------------

/// One ranked row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LeaderboardEntry {
    /// Ranked user.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Number of tiles currently owned.
    #[ts(type = "number")]
    pub tile_count: u64,
    /// 1-based position.
    pub rank: u32,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Aggregate board statistics served by `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BoardStats {
    /// `width * height` from configuration.
    #[ts(type = "number")]
    pub total_tiles: u64,
    /// Tiles with an owner.
    #[ts(type = "number")]
    pub claimed_tiles: u64,
    /// `total_tiles - claimed_tiles`, never negative.
    #[ts(type = "number")]
    pub unclaimed_tiles: u64,
    /// Size of the shared online set.
    #[ts(type = "number")]
    pub online_users: u64,
    /// Registered users.
    #[ts(type = "number")]
    pub total_users: u64,
    /// Most recent claim, if any.
    pub last_activity: Option<DateTime<Utc>>,
}

/// Full board served by `GET /api/board`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BoardSnapshot {
    /// Every tile ordered by id.
    pub tiles: Vec<Tile>,
    /// Grid columns.
    pub grid_width: u32,
    /// Grid rows.
    pub grid_height: u32,
    /// Tiles in the store.
    #[ts(type = "number")]
    pub total_tiles: u64,
    /// Claimed tiles in the store.
    #[ts(type = "number")]
    pub claimed_tiles: u64,
}
