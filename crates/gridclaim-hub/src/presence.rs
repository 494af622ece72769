//! Presence record updates and the periodic presence reconciler.
//!
//! The presence record is a single cluster-wide set in the hot store. A
//! session joining adds its user; teardown removes it and publishes
//! `USER_LEFT` with the remaining online count.
//!
//! The reconciler compares that shared set against the users connected to
//! *this* process and marks every other member offline. With more than one
//! process this can evict a user who is connected elsewhere; the set would
//! need per-process entries to avoid it. The behavior is kept as is.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use gridclaim_db::{HotStore, TileStore};
use gridclaim_types::{ServerEvent, User, UserId, UserJoinedPayload, UserLeftPayload};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::PresenceError;
use crate::hub::HubHandle;

/// Presence set plus the bus its join/leave events go out on.
#[derive(Clone)]
pub struct Presence {
    hot: HotStore,
    bus: EventBus,
}

impl Presence {
    /// Bind presence to its stores.
    pub const fn new(hot: HotStore, bus: EventBus) -> Self {
        Self { hot, bus }
    }

    /// Add the user to the online set and return the new online count.
    pub async fn mark_online(&self, user_id: UserId) -> Result<u64, PresenceError> {
        self.hot.add_online(user_id).await?;
        Ok(self.hot.online_count().await?)
    }

    /// Publish `USER_JOINED`.
    pub async fn announce_join(&self, user: &User, online_count: u64) -> Result<(), PresenceError> {
        let event = ServerEvent::UserJoined(UserJoinedPayload {
            user_id: user.id,
            username: user.username.clone(),
            color: user.color.clone(),
            online_count,
        });
        self.bus.publish(&event).await?;
        Ok(())
    }

    /// Remove the user from the online set and publish `USER_LEFT` with the
    /// decremented count. Returns that count.
    ///
    /// `USER_LEFT` is published even when the hot store fails; the count
    /// then falls back to 0 and the store error is returned afterwards.
    pub async fn leave(&self, user_id: UserId, username: &str) -> Result<u64, PresenceError> {
        let removed = self.hot.remove_online(user_id).await;
        if let Err(e) = &removed {
            warn!(user_id = %user_id, error = %e, "Failed to remove user from presence");
        }
        let online_count = match self.hot.online_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to read online count");
                0
            }
        };

        let event = ServerEvent::UserLeft(UserLeftPayload {
            user_id,
            username: username.to_owned(),
            online_count,
        });
        self.bus.publish(&event).await?;
        info!(user_id = %user_id, online_count, "User left");
        removed?;
        Ok(online_count)
    }

    /// Current size of the online set.
    pub async fn online_count(&self) -> Result<u64, PresenceError> {
        Ok(self.hot.online_count().await?)
    }
}

/// Periodically drops presence entries for users not connected here.
pub struct PresenceReconciler {
    presence: Presence,
    hot: HotStore,
    tiles: TileStore,
    hub: HubHandle,
    interval: Duration,
}

impl PresenceReconciler {
    /// Build a reconciler running every `interval`.
    pub const fn new(
        presence: Presence,
        hot: HotStore,
        tiles: TileStore,
        hub: HubHandle,
        interval: Duration,
    ) -> Self {
        Self {
            presence,
            hot,
            tiles,
            hub,
            interval,
        }
    }

    /// One pass. Members of the shared set with no session on this process
    /// are removed; known users also get a `USER_LEFT`. An entry that fails
    /// is logged and the pass moves on. Returns how many entries were
    /// removed.
    pub async fn reconcile_once(&self) -> Result<usize, PresenceError> {
        let members = self.hot.online_members().await?;
        let local: HashSet<UserId> = self.hub.connected_users().await?.into_iter().collect();
        let stale: Vec<UserId> = members
            .into_iter()
            .filter(|user_id| !local.contains(user_id))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let names: HashMap<UserId, String> = self
            .tiles
            .users_by_ids(&stale)
            .await?
            .into_iter()
            .map(|user| (user.id, user.username))
            .collect();

        let mut removed = 0_usize;
        for user_id in &stale {
            let outcome = match names.get(user_id) {
                Some(username) => self.presence.leave(*user_id, username).await.map(|_| ()),
                None => {
                    debug!(user_id = %user_id, "Removing unknown user from presence");
                    self.hot.remove_online(*user_id).await.map_err(PresenceError::from)
                }
            };
            match outcome {
                Ok(()) => removed = removed.saturating_add(1),
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to reconcile presence entry"),
            }
        }
        info!(stale = stale.len(), removed, "Presence reconciled");
        Ok(removed)
    }

    /// Reconcile every interval until `shutdown` fires. Failed passes are
    /// logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "Presence reconciliation failed");
                    }
                }
            }
        }
        info!("Presence reconciler stopped");
    }
}
