//! Capability contracts consumed by the realtime layer.
//!
//! [`TileStore`] is the claim-capable authoritative store and [`HotStore`]
//! the shared presence and ranking store. Both use enum dispatch instead of
//! trait objects because async methods are not dyn-compatible; each has a
//! production variant and an in-memory variant that doubles for tests and
//! single-process development.

use chrono::{DateTime, Utc};
use gridclaim_types::{LeaderboardEntry, Tile, User, UserId};

use crate::dragonfly::DragonflyPool;
use crate::error::DbError;
use crate::memory::{MemoryHotStore, MemoryTileStore};
use crate::tile_store::PgTileStore;

// ---------------------------------------------------------------------------
// Tile store
// ---------------------------------------------------------------------------

/// Authoritative tile and user store.
#[derive(Clone)]
pub enum TileStore {
    /// `PostgreSQL`.
    Postgres(PgTileStore),
    /// Process memory.
    Memory(MemoryTileStore),
}

impl TileStore {
    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Create one tile per grid cell when the board is empty.
    pub async fn seed_tiles(&self, width: u32, height: u32) -> Result<u64, DbError> {
        match self {
            Self::Postgres(store) => store.seed_tiles(width, height).await,
            Self::Memory(store) => store.seed_tiles(width, height).await,
        }
    }

    /// Conditionally transfer an unowned tile; `None` when nothing matched.
    pub async fn claim_tile(&self, tile_id: i32, user_id: UserId) -> Result<Option<Tile>, DbError> {
        match self {
            Self::Postgres(store) => store.claim_tile(tile_id, user_id).await,
            Self::Memory(store) => store.claim_tile(tile_id, user_id).await,
        }
    }

    /// Every tile ordered by id.
    pub async fn get_all_tiles(&self) -> Result<Vec<Tile>, DbError> {
        match self {
            Self::Postgres(store) => store.get_all_tiles().await,
            Self::Memory(store) => store.get_all_tiles().await,
        }
    }

    /// `(total, claimed)`.
    pub async fn count_tiles(&self) -> Result<(u64, u64), DbError> {
        match self {
            Self::Postgres(store) => store.count_tiles().await,
            Self::Memory(store) => store.count_tiles().await,
        }
    }

    /// Time of the most recent claim.
    pub async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        match self {
            Self::Postgres(store) => store.last_activity().await,
            Self::Memory(store) => store.last_activity().await,
        }
    }

    /// One user by id.
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, DbError> {
        match self {
            Self::Postgres(store) => store.get_user(user_id).await,
            Self::Memory(store) => store.get_user(user_id).await,
        }
    }

    /// Known users among `ids`.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, DbError> {
        match self {
            Self::Postgres(store) => store.users_by_ids(ids).await,
            Self::Memory(store) => store.users_by_ids(ids).await,
        }
    }

    /// Registered user count.
    pub async fn count_users(&self) -> Result<u64, DbError> {
        match self {
            Self::Postgres(store) => store.count_users().await,
            Self::Memory(store) => store.count_users().await,
        }
    }

    /// Refresh a user's `last_seen`.
    pub async fn update_last_seen(&self, user_id: UserId) -> Result<(), DbError> {
        match self {
            Self::Postgres(store) => store.update_last_seen(user_id).await,
            Self::Memory(store) => store.update_last_seen(user_id).await,
        }
    }

    /// Top `limit` users by owned tiles.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, DbError> {
        match self {
            Self::Postgres(store) => store.leaderboard(limit).await,
            Self::Memory(store) => store.leaderboard(limit).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Hot store
// ---------------------------------------------------------------------------

/// Shared presence set and claim ranking.
#[derive(Clone)]
pub enum HotStore {
    /// `Dragonfly` / Redis.
    Dragonfly(DragonflyPool),
    /// Process memory.
    Memory(MemoryHotStore),
}

impl HotStore {
    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dragonfly(_) => "dragonfly",
            Self::Memory(_) => "memory",
        }
    }

    /// Add a user to the online set.
    pub async fn add_online(&self, user_id: UserId) -> Result<(), DbError> {
        match self {
            Self::Dragonfly(pool) => pool.add_online(user_id).await,
            Self::Memory(store) => store.add_online(user_id).await,
        }
    }

    /// Remove a user from the online set.
    pub async fn remove_online(&self, user_id: UserId) -> Result<(), DbError> {
        match self {
            Self::Dragonfly(pool) => pool.remove_online(user_id).await,
            Self::Memory(store) => store.remove_online(user_id).await,
        }
    }

    /// Members of the online set.
    pub async fn online_members(&self) -> Result<Vec<UserId>, DbError> {
        match self {
            Self::Dragonfly(pool) => pool.online_members().await,
            Self::Memory(store) => store.online_members().await,
        }
    }

    /// Size of the online set.
    pub async fn online_count(&self) -> Result<u64, DbError> {
        match self {
            Self::Dragonfly(pool) => pool.online_count().await,
            Self::Memory(store) => store.online_count().await,
        }
    }

    /// Add one claim to the user's ranking score.
    pub async fn increment_score(&self, user_id: UserId) -> Result<(), DbError> {
        match self {
            Self::Dragonfly(pool) => pool.increment_score(user_id).await,
            Self::Memory(store) => store.increment_score(user_id).await,
        }
    }
}
