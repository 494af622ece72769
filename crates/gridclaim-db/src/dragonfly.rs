//! `Dragonfly` (Redis-compatible) presence and ranking operations.
//!
//! # Key Patterns
//!
//! | Key | Type | Description |
//! |-----|------|-------------|
//! | `board:online` | Set | User ids with at least one live connection somewhere in the cluster |
//! | `board:leaderboard` | Sorted set | Claim count per user id |
//!
//! Both keys are shared by every server process. Set add/remove and
//! `ZINCRBY` are atomic on the server, so no client-side locking is needed.

use fred::prelude::*;
use gridclaim_types::UserId;

use crate::error::DbError;

/// Shared presence set.
pub const ONLINE_KEY: &str = "board:online";

/// Shared claim ranking.
pub const LEADERBOARD_KEY: &str = "board:leaderboard";

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis scheme: `redis://host:port` or
    /// `redis://host:port/db`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    // =========================================================================
    // Presence -- board:online
    // =========================================================================

    /// Add a user to `board:online`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn add_online(&self, user_id: UserId) -> Result<(), DbError> {
        let _: u32 = self
            .client
            .sadd(ONLINE_KEY, user_id.to_string().as_str())
            .await?;
        Ok(())
    }

    /// Remove a user from `board:online`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn remove_online(&self, user_id: UserId) -> Result<(), DbError> {
        let _: u32 = self
            .client
            .srem(ONLINE_KEY, user_id.to_string().as_str())
            .await?;
        Ok(())
    }

    /// Every member of `board:online`. Members that are not UUIDs are
    /// skipped and removed from the set.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn online_members(&self) -> Result<Vec<UserId>, DbError> {
        let members: Vec<String> = self.client.smembers(ONLINE_KEY).await?;
        let (user_ids, malformed) = parse_members(members);
        if !malformed.is_empty() {
            tracing::warn!(
                count = malformed.len(),
                members = ?malformed,
                "Dropping malformed presence members"
            );
            let removed: Result<u64, fred::error::Error> =
                self.client.srem(ONLINE_KEY, malformed).await;
            if let Err(e) = removed {
                tracing::warn!(error = %e, "Failed to remove malformed presence members");
            }
        }
        Ok(user_ids)
    }

    /// Cardinality of `board:online`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn online_count(&self) -> Result<u64, DbError> {
        let count: u64 = self.client.scard(ONLINE_KEY).await?;
        Ok(count)
    }

    // =========================================================================
    // Ranking -- board:leaderboard
    // =========================================================================

    /// Add one claim to the user's score in `board:leaderboard`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn increment_score(&self, user_id: UserId) -> Result<(), DbError> {
        let _: f64 = self
            .client
            .zincrby(LEADERBOARD_KEY, 1.0, user_id.to_string().as_str())
            .await?;
        Ok(())
    }

    /// Delete both board keys.
    ///
    /// **WARNING:** Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn clear(&self) -> Result<(), DbError> {
        let _: u32 = self.client.del(vec![ONLINE_KEY, LEADERBOARD_KEY]).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn quit(&self) {
        if let Err(e) = self.client.quit().await {
            tracing::warn!(error = %e, "Dragonfly quit failed");
        }
    }
}

/// Split raw set members into user ids and the members that did not parse.
fn parse_members(members: Vec<String>) -> (Vec<UserId>, Vec<String>) {
    let mut user_ids = Vec::with_capacity(members.len());
    let mut malformed = Vec::new();
    for member in members {
        match member.parse::<UserId>() {
            Ok(user_id) => user_ids.push(user_id),
            Err(_) => malformed.push(member),
        }
    }
    (user_ids, malformed)
}
