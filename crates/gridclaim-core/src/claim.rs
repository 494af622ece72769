//! The Claim Resolver: atomic, irreversible transfer of tile ownership.
//!
//! The store's conditional update is the sole concurrency guard. Two
//! simultaneous claims on the same unowned tile resolve to exactly one
//! winner regardless of arrival order or which process served them,
//! because the guard is evaluated atomically inside the store.

use gridclaim_db::{DbError, HotStore, TileStore};
use gridclaim_types::{RejectReason, Tile, UserId};
use tracing::{info, warn};

use crate::config::GridConfig;

/// Why a claim did not transfer ownership.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    /// The id lies outside `[0, width * height)`; nothing was touched.
    #[error("tile {tile_id} is outside the {width}x{height} grid")]
    InvalidTile {
        /// Requested id.
        tile_id: i64,
        /// Grid columns.
        width: u32,
        /// Grid rows.
        height: u32,
    },

    /// The conditional update matched no row: the tile is owned already
    /// (or missing from the store, which a racing client cannot tell apart).
    #[error("tile {0} is already claimed")]
    AlreadyClaimed(i32),

    /// The store failed.
    #[error("claim store error: {0}")]
    Store(#[from] DbError),
}

impl ClaimError {
    /// The wire rejection reason.
    pub const fn reason(&self) -> RejectReason {
        match self {
            Self::InvalidTile { .. } => RejectReason::InvalidTile,
            Self::AlreadyClaimed(_) => RejectReason::AlreadyClaimed,
            Self::Store(_) => RejectReason::ServerError,
        }
    }
}

/// Validates and applies claims against the shared stores.
#[derive(Clone)]
pub struct ClaimResolver {
    tiles: TileStore,
    hot: HotStore,
    grid: GridConfig,
}

impl ClaimResolver {
    /// Build a resolver over the given stores and grid.
    pub const fn new(tiles: TileStore, hot: HotStore, grid: GridConfig) -> Self {
        Self { tiles, hot, grid }
    }

    /// The grid this resolver validates against.
    pub const fn grid(&self) -> GridConfig {
        self.grid
    }

    /// Claim `tile_id` for `user_id`.
    ///
    /// On success the claim record has been appended in the same statement
    /// as the transfer, and the claimant's ranking score has been bumped. A
    /// ranking failure after a committed transfer is logged, not returned:
    /// the tile is already owned and every viewer must hear about it.
    ///
    /// # Errors
    ///
    /// [`ClaimError::InvalidTile`] for out-of-range ids,
    /// [`ClaimError::AlreadyClaimed`] when the guard fails and
    /// [`ClaimError::Store`] when the store is unreachable.
    pub async fn claim(&self, tile_id: i64, user_id: UserId) -> Result<Tile, ClaimError> {
        let index = self
            .grid
            .tile_index(tile_id)
            .ok_or(ClaimError::InvalidTile {
                tile_id,
                width: self.grid.width,
                height: self.grid.height,
            })?;

        let tile = self
            .tiles
            .claim_tile(index, user_id)
            .await?
            .ok_or(ClaimError::AlreadyClaimed(index))?;

        // The transfer is already committed, so a ranking failure is only
        // logged; rejecting here would tell the claimant they lost a tile
        // that every other viewer sees them own.
        if let Err(e) = self.hot.increment_score(user_id).await {
            warn!(tile_id = index, user_id = %user_id, error = %e, "Ranking update failed after claim");
        }

        info!(tile_id = index, x = tile.x, y = tile.y, user_id = %user_id, "Tile claimed");
        Ok(tile)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use gridclaim_db::{MemoryHotStore, MemoryTileStore};
    use gridclaim_types::User;

    use super::*;

    struct Fixture {
        resolver: ClaimResolver,
        tiles: MemoryTileStore,
        hot: MemoryHotStore,
    }

    async fn fixture(width: u32, height: u32) -> Fixture {
        let tiles = MemoryTileStore::new();
        let hot = MemoryHotStore::new();
        tiles.seed_tiles(width, height).await.unwrap();
        let resolver = ClaimResolver::new(
            TileStore::Memory(tiles.clone()),
            HotStore::Memory(hot.clone()),
            GridConfig { width, height },
        );
        Fixture { resolver, tiles, hot }
    }

    async fn user(tiles: &MemoryTileStore, name: &str) -> UserId {
        let id = UserId::new();
        tiles
            .insert_user(User {
                id,
                username: name.to_owned(),
                color: String::from("#aa00aa"),
                created_at: Utc::now(),
                last_seen: Utc::now(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn out_of_range_ids_are_rejected_without_mutation() {
        let f = fixture(2, 1).await;
        let alice = user(&f.tiles, "alice").await;

        for tile_id in [-1, 2, 3, i64::from(i32::MAX), i64::MAX, i64::MIN] {
            let err = f.resolver.claim(tile_id, alice).await.unwrap_err();
            assert_eq!(err.reason(), RejectReason::InvalidTile, "tile {tile_id}");
        }
        assert_eq!(f.tiles.claim_record_count().await, 0);
        assert_eq!(f.tiles.count_tiles().await.unwrap(), (2, 0));
        assert_eq!(f.hot.score(alice).await, 0);
    }

    #[tokio::test]
    async fn reclaim_is_rejected_and_owner_kept() {
        let f = fixture(2, 1).await;
        let alice = user(&f.tiles, "alice").await;
        let bob = user(&f.tiles, "bob").await;

        let tile = f.resolver.claim(0, alice).await.unwrap();
        assert_eq!(tile.owner_id, Some(alice));
        assert_eq!(tile.owner_color.as_deref(), Some("#aa00aa"));

        for claimant in [bob, alice] {
            let err = f.resolver.claim(0, claimant).await.unwrap_err();
            assert!(matches!(err, ClaimError::AlreadyClaimed(0)));
        }
        let tiles = f.tiles.get_all_tiles().await.unwrap();
        assert_eq!(tiles.first().and_then(|t| t.owner_id), Some(alice));
        assert_eq!(f.hot.score(alice).await, 1);
        assert_eq!(f.hot.score(bob).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let f = fixture(4, 4).await;
        let resolver = Arc::new(f.resolver.clone());
        let mut contenders = Vec::new();
        for i in 0..16 {
            contenders.push(user(&f.tiles, &format!("user{i}")).await);
        }

        let handles: Vec<_> = contenders
            .iter()
            .map(|&id| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { (id, resolver.claim(5, id).await) })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                (id, Ok(_)) => winners.push(id),
                (_, Err(e)) => assert!(matches!(e, ClaimError::AlreadyClaimed(5))),
            }
        }

        assert_eq!(winners.len(), 1);
        let tiles = f.tiles.get_all_tiles().await.unwrap();
        let owner = tiles.iter().find(|t| t.id == 5).and_then(|t| t.owner_id);
        assert_eq!(owner, winners.first().copied());
        assert_eq!(f.tiles.claim_record_count().await, 1);
    }

    #[tokio::test]
    async fn store_failure_maps_to_server_error() {
        let f = fixture(2, 1).await;
        let alice = user(&f.tiles, "alice").await;
        f.tiles.set_unavailable(true);

        let err = f.resolver.claim(0, alice).await.unwrap_err();
        assert!(matches!(err, ClaimError::Store(_)));
        assert_eq!(err.reason(), RejectReason::ServerError);
    }

    #[tokio::test]
    async fn ranking_failure_does_not_fail_committed_claim() {
        let f = fixture(2, 1).await;
        let alice = user(&f.tiles, "alice").await;
        f.hot.set_unavailable(true);

        let tile = f.resolver.claim(1, alice).await.unwrap();
        assert_eq!(tile.owner_id, Some(alice));
        assert_eq!(f.tiles.claim_record_count().await, 1);
    }
}
