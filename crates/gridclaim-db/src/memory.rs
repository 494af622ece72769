//! In-memory stand-ins for `PostgreSQL` and `Dragonfly`.
//!
//! Used by the `in_memory` deployment backend and as test doubles. Each
//! double serializes its operations behind one mutex, which gives the same
//! atomicity the real stores provide: the claim guard is checked and
//! applied under the lock, exactly like the conditional `UPDATE`.
//!
//! [`MemoryTileStore::set_unavailable`] and
//! [`MemoryHotStore::set_unavailable`] make every subsequent operation fail,
//! for exercising dependency-error paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use gridclaim_types::{LeaderboardEntry, Tile, User, UserId};
use tokio::sync::Mutex;

use crate::error::DbError;

// =============================================================================
// Tile store double
// =============================================================================

#[derive(Default)]
struct MemoryBoard {
    tiles: BTreeMap<i32, Tile>,
    users: HashMap<UserId, User>,
    /// Append-only `(tile_id, user_id, claimed_at)` records.
    claims: Vec<(i32, UserId, DateTime<Utc>)>,
}

impl MemoryBoard {
    fn with_owner(&self, mut tile: Tile) -> Tile {
        if let Some(user) = tile.owner_id.and_then(|id| self.users.get(&id)) {
            tile.owner_username = Some(user.username.clone());
            tile.owner_color = Some(user.color.clone());
        }
        tile
    }
}

/// Tile and user store held in process memory.
#[derive(Clone, Default)]
pub struct MemoryTileStore {
    board: Arc<Mutex<MemoryBoard>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryTileStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("memory tile store"));
        }
        Ok(())
    }

    /// Register a user. In production users are created by the account
    /// service; this exists for tests and the `in_memory` backend.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn insert_user(&self, user: User) -> Result<(), DbError> {
        self.check()?;
        self.board.lock().await.users.insert(user.id, user);
        Ok(())
    }

    /// Number of claim records appended so far.
    pub async fn claim_record_count(&self) -> usize {
        self.board.lock().await.claims.len()
    }

    /// See [`crate::PgTileStore::seed_tiles`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn seed_tiles(&self, width: u32, height: u32) -> Result<u64, DbError> {
        self.check()?;
        let mut board = self.board.lock().await;
        if !board.tiles.is_empty() {
            return Ok(0);
        }
        let width = i32::try_from(width).map_err(|e| DbError::Config(format!("width: {e}")))?;
        let height = i32::try_from(height).map_err(|e| DbError::Config(format!("height: {e}")))?;
        let mut inserted: u64 = 0;
        for y in 0..height {
            for x in 0..width {
                let id = y
                    .checked_mul(width)
                    .and_then(|row| row.checked_add(x))
                    .ok_or_else(|| DbError::Config(String::from("grid too large")))?;
                board.tiles.insert(id, Tile::unclaimed(id, x, y));
                inserted = inserted.saturating_add(1);
            }
        }
        Ok(inserted)
    }

    /// See [`crate::PgTileStore::claim_tile`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn claim_tile(&self, tile_id: i32, user_id: UserId) -> Result<Option<Tile>, DbError> {
        self.check()?;
        let mut board = self.board.lock().await;
        let now = Utc::now();
        let claimed = match board.tiles.get_mut(&tile_id) {
            Some(tile) if tile.owner_id.is_none() => {
                tile.owner_id = Some(user_id);
                tile.claimed_at = Some(now);
                tile.clone()
            }
            _ => return Ok(None),
        };
        board.claims.push((tile_id, user_id, now));
        Ok(Some(board.with_owner(claimed)))
    }

    /// See [`crate::PgTileStore::get_all_tiles`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn get_all_tiles(&self) -> Result<Vec<Tile>, DbError> {
        self.check()?;
        let board = self.board.lock().await;
        Ok(board
            .tiles
            .values()
            .cloned()
            .map(|tile| board.with_owner(tile))
            .collect())
    }

    /// See [`crate::PgTileStore::count_tiles`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn count_tiles(&self) -> Result<(u64, u64), DbError> {
        self.check()?;
        let board = self.board.lock().await;
        let total = u64::try_from(board.tiles.len()).unwrap_or(u64::MAX);
        let claimed = board.tiles.values().filter(|t| t.is_claimed()).count();
        Ok((total, u64::try_from(claimed).unwrap_or(u64::MAX)))
    }

    /// See [`crate::PgTileStore::last_activity`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        self.check()?;
        Ok(self.board.lock().await.claims.iter().map(|c| c.2).max())
    }

    /// See [`crate::PgTileStore::get_user`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, DbError> {
        self.check()?;
        Ok(self.board.lock().await.users.get(&user_id).cloned())
    }

    /// See [`crate::PgTileStore::users_by_ids`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, DbError> {
        self.check()?;
        let board = self.board.lock().await;
        Ok(ids.iter().filter_map(|id| board.users.get(id).cloned()).collect())
    }

    /// See [`crate::PgTileStore::count_users`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn count_users(&self) -> Result<u64, DbError> {
        self.check()?;
        Ok(u64::try_from(self.board.lock().await.users.len()).unwrap_or(u64::MAX))
    }

    /// See [`crate::PgTileStore::update_last_seen`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn update_last_seen(&self, user_id: UserId) -> Result<(), DbError> {
        self.check()?;
        if let Some(user) = self.board.lock().await.users.get_mut(&user_id) {
            user.last_seen = Utc::now();
        }
        Ok(())
    }

    /// See [`crate::PgTileStore::leaderboard`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, DbError> {
        self.check()?;
        let board = self.board.lock().await;
        let mut counts: HashMap<UserId, u64> = board.users.keys().map(|id| (*id, 0)).collect();
        for owner in board.tiles.values().filter_map(|t| t.owner_id) {
            if let Some(count) = counts.get_mut(&owner) {
                *count = count.saturating_add(1);
            }
        }
        let mut ranked: Vec<(&User, u64)> = board
            .users
            .values()
            .map(|u| (u, counts.get(&u.id).copied().unwrap_or_default()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.username.cmp(&b.0.username)));

        Ok((1_u32..)
            .zip(ranked)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(rank, (user, tile_count))| LeaderboardEntry {
                user_id: user.id,
                username: user.username.clone(),
                color: user.color.clone(),
                tile_count,
                rank,
            })
            .collect())
    }
}

// =============================================================================
// Hot store double
// =============================================================================

#[derive(Default)]
struct MemoryHot {
    online: BTreeSet<UserId>,
    scores: HashMap<UserId, u64>,
    pinned: BTreeSet<UserId>,
}

/// Presence set and claim ranking held in process memory.
#[derive(Clone, Default)]
pub struct MemoryHotStore {
    hot: Arc<Mutex<MemoryHot>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryHotStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("memory hot store"));
        }
        Ok(())
    }

    /// Make removals of this one user fail while everything else works.
    pub async fn pin_online(&self, user_id: UserId) {
        self.hot.lock().await.pinned.insert(user_id);
    }

    /// See [`crate::DragonflyPool::add_online`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn add_online(&self, user_id: UserId) -> Result<(), DbError> {
        self.check()?;
        self.hot.lock().await.online.insert(user_id);
        Ok(())
    }

    /// See [`crate::DragonflyPool::remove_online`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn remove_online(&self, user_id: UserId) -> Result<(), DbError> {
        self.check()?;
        let mut hot = self.hot.lock().await;
        if hot.pinned.contains(&user_id) {
            return Err(DbError::Unavailable("pinned presence entry"));
        }
        hot.online.remove(&user_id);
        Ok(())
    }

    /// See [`crate::DragonflyPool::online_members`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn online_members(&self) -> Result<Vec<UserId>, DbError> {
        self.check()?;
        Ok(self.hot.lock().await.online.iter().copied().collect())
    }

    /// See [`crate::DragonflyPool::online_count`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn online_count(&self) -> Result<u64, DbError> {
        self.check()?;
        Ok(u64::try_from(self.hot.lock().await.online.len()).unwrap_or(u64::MAX))
    }

    /// See [`crate::DragonflyPool::increment_score`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the store is switched off.
    pub async fn increment_score(&self, user_id: UserId) -> Result<(), DbError> {
        self.check()?;
        let mut hot = self.hot.lock().await;
        let score = hot.scores.entry(user_id).or_default();
        *score = score.saturating_add(1);
        Ok(())
    }

    /// Current ranking score of a user.
    pub async fn score(&self, user_id: UserId) -> u64 {
        self.hot
            .lock()
            .await
            .scores
            .get(&user_id)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: UserId::new(),
            username: name.to_owned(),
            color: String::from("#00ff00"),
            created_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let store = MemoryTileStore::new();
        assert_eq!(store.seed_tiles(3, 2).await.unwrap(), 6);
        assert_eq!(store.seed_tiles(3, 2).await.unwrap(), 0);
        let tiles = store.get_all_tiles().await.unwrap();
        let last = tiles.last().unwrap();
        assert_eq!((last.id, last.x, last.y), (5, 2, 1));
    }

    #[tokio::test]
    async fn claim_joins_owner_and_records_once() {
        let store = MemoryTileStore::new();
        store.seed_tiles(2, 2).await.unwrap();
        let alice = user("alice");
        store.insert_user(alice.clone()).await.unwrap();

        let tile = store.claim_tile(1, alice.id).await.unwrap().unwrap();
        assert_eq!(tile.owner_id, Some(alice.id));
        assert_eq!(tile.owner_username.as_deref(), Some("alice"));
        assert!(tile.claimed_at.is_some());

        assert!(store.claim_tile(1, UserId::new()).await.unwrap().is_none());
        assert!(store.claim_tile(99, alice.id).await.unwrap().is_none());
        assert_eq!(store.claim_record_count().await, 1);
        assert_eq!(store.count_tiles().await.unwrap(), (4, 1));
        assert!(store.last_activity().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_owned_tiles() {
        let store = MemoryTileStore::new();
        store.seed_tiles(4, 1).await.unwrap();
        let alice = user("alice");
        let bob = user("bob");
        store.insert_user(alice.clone()).await.unwrap();
        store.insert_user(bob.clone()).await.unwrap();
        store.claim_tile(0, bob.id).await.unwrap();
        store.claim_tile(1, bob.id).await.unwrap();
        store.claim_tile(2, alice.id).await.unwrap();

        let board = store.leaderboard(1).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].username, "bob");
        assert_eq!(board[0].tile_count, 2);
        assert_eq!(board[0].rank, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryTileStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.claim_tile(0, UserId::new()).await,
            Err(DbError::Unavailable(_))
        ));

        let hot = MemoryHotStore::new();
        hot.set_unavailable(true);
        assert!(hot.online_count().await.is_err());
        hot.set_unavailable(false);
        hot.add_online(UserId::new()).await.unwrap();
        assert_eq!(hot.online_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pinned_user_cannot_be_removed() {
        let hot = MemoryHotStore::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        hot.add_online(alice).await.unwrap();
        hot.add_online(bob).await.unwrap();
        hot.pin_online(alice).await;

        assert!(hot.remove_online(alice).await.is_err());
        hot.remove_online(bob).await.unwrap();
        assert_eq!(hot.online_members().await.unwrap(), vec![alice]);
    }
}
