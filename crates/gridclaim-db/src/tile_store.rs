//! `PostgreSQL` queries for tiles, users and the claim history.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so builds never need a live database. Every query is parameterized.
//!
//! The claim path is a single statement: the conditional update, the
//! claim-record insert and the owner join all run inside one CTE, so the
//! `owner_id IS NULL` guard is evaluated atomically by `PostgreSQL` and a
//! committed transfer can never lose its audit row.

use chrono::{DateTime, Utc};
use gridclaim_types::{LeaderboardEntry, Tile, User, UserId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Tile, user and leaderboard queries against `PostgreSQL`.
#[derive(Clone)]
pub struct PgTileStore {
    pool: PgPool,
}

impl PgTileStore {
    /// Bind the store to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Insert one row per grid cell unless the table already has tiles.
    ///
    /// Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn seed_tiles(&self, width: u32, height: u32) -> Result<u64, DbError> {
        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tiles")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            tracing::debug!(existing, "Tiles already seeded");
            return Ok(0);
        }

        let result = sqlx::query(
            r"INSERT INTO tiles (id, x, y)
              SELECT y * $1 + x, x, y
              FROM generate_series(0, $1 - 1) AS x,
                   generate_series(0, $2 - 1) AS y
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(i64::from(width))
        .bind(i64::from(height))
        .execute(&self.pool)
        .await?;

        tracing::info!(width, height, inserted = result.rows_affected(), "Seeded tiles");
        Ok(result.rows_affected())
    }

    /// Transfer an unowned tile to `user_id`.
    ///
    /// Returns `None` when no row matched: the tile is already owned or
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn claim_tile(&self, tile_id: i32, user_id: UserId) -> Result<Option<Tile>, DbError> {
        let row = sqlx::query_as::<_, TileRow>(
            r"WITH claimed AS (
                  UPDATE tiles
                  SET owner_id = $2, claimed_at = NOW()
                  WHERE id = $1 AND owner_id IS NULL
                  RETURNING id, x, y, owner_id, claimed_at
              ), recorded AS (
                  INSERT INTO tile_events (tile_id, user_id, event_type)
                  SELECT id, owner_id, 'claim' FROM claimed
              )
              SELECT c.id, c.x, c.y, c.owner_id, c.claimed_at,
                     u.username AS owner_username,
                     u.color AS owner_color
              FROM claimed c
              LEFT JOIN users u ON u.id = c.owner_id",
        )
        .bind(tile_id)
        .bind(user_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tile::from))
    }

    /// Every tile with owner display attributes, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_all_tiles(&self) -> Result<Vec<Tile>, DbError> {
        let rows = sqlx::query_as::<_, TileRow>(
            r"SELECT t.id, t.x, t.y, t.owner_id, t.claimed_at,
                     u.username AS owner_username,
                     u.color AS owner_color
              FROM tiles t
              LEFT JOIN users u ON u.id = t.owner_id
              ORDER BY t.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Tile::from).collect())
    }

    /// `(total, claimed)` tile counts.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count_tiles(&self) -> Result<(u64, u64), DbError> {
        let (total, claimed): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(owner_id) FROM tiles")
                .fetch_one(&self.pool)
                .await?;
        Ok((to_count(total), to_count(claimed)))
    }

    /// Time of the most recent claim.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let (last,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(created_at) FROM tile_events")
                .fetch_one(&self.pool)
                .await?;
        Ok(last)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Look up one user.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"SELECT id, username, color, created_at, last_seen
              FROM users
              WHERE id = $1",
        )
        .bind(user_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    /// Look up many users at once; unknown ids are simply absent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        let rows = sqlx::query_as::<_, UserRow>(
            r"SELECT id, username, color, created_at, last_seen
              FROM users
              WHERE id = ANY($1)",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Number of registered users.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count_users(&self) -> Result<u64, DbError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(to_count(total))
    }

    /// Stamp `last_seen = NOW()`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn update_last_seen(&self, user_id: UserId) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_seen = NOW() WHERE id = $1")
            .bind(user_id.into_inner())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Top `limit` users by owned tile count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, DbError> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            r"SELECT u.id, u.username, u.color, COUNT(t.id) AS tile_count
              FROM users u
              LEFT JOIN tiles t ON t.owner_id = u.id
              GROUP BY u.id
              ORDER BY tile_count DESC, u.username
              LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok((1_u32..)
            .zip(rows)
            .map(|(rank, row)| LeaderboardEntry {
                user_id: UserId::from(row.id),
                username: row.username,
                color: row.color,
                tile_count: to_count(row.tile_count),
                rank,
            })
            .collect())
    }
}

/// Clamp a `COUNT(*)` result into an unsigned count.
fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

// =============================================================================
// Row types
// =============================================================================

/// A row from `tiles` joined with its owner.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TileRow {
    /// Tile index.
    pub id: i32,
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Owner, if claimed.
    pub owner_id: Option<Uuid>,
    /// Claim time, if claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Joined `users.username`.
    pub owner_username: Option<String>,
    /// Joined `users.color`.
    pub owner_color: Option<String>,
}

impl From<TileRow> for Tile {
    fn from(row: TileRow) -> Self {
        Self {
            id: row.id,
            x: row.x,
            y: row.y,
            owner_id: row.owner_id.map(UserId::from),
            claimed_at: row.claimed_at,
            owner_username: row.owner_username,
            owner_color: row.owner_color,
        }
    }
}

/// A row from `users`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last connection time.
    pub last_seen: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId::from(row.id),
            username: row.username,
            color: row.color,
            created_at: row.created_at,
            last_seen: row.last_seen,
        }
    }
}

/// An aggregated leaderboard row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaderboardRow {
    /// User id.
    pub id: Uuid,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Owned tiles.
    pub tile_count: i64,
}
