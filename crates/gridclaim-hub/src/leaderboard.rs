//! Periodic `LEADERBOARD_UPDATE` broadcast.

use std::time::Duration;

use gridclaim_db::TileStore;
use gridclaim_types::{LeaderboardUpdatePayload, ServerEvent};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::LeaderboardError;

/// Reads the ranking and publishes it on the bus at a fixed interval.
pub struct LeaderboardTicker {
    tiles: TileStore,
    bus: EventBus,
    interval: Duration,
    limit: u32,
}

impl LeaderboardTicker {
    /// Build a ticker publishing the top `limit` users every `interval`.
    pub const fn new(tiles: TileStore, bus: EventBus, interval: Duration, limit: u32) -> Self {
        Self {
            tiles,
            bus,
            interval,
            limit,
        }
    }

    /// Publish one update. Returns the number of ranked rows sent.
    pub async fn tick_once(&self) -> Result<usize, LeaderboardError> {
        let leaderboard = self.tiles.leaderboard(self.limit).await?;
        let rows = leaderboard.len();
        self.bus
            .publish(&ServerEvent::LeaderboardUpdate(LeaderboardUpdatePayload { leaderboard }))
            .await?;
        debug!(rows, "Leaderboard published");
        Ok(rows)
    }

    /// Publish every interval, starting one interval after the call, until
    /// `shutdown` fires. A zero interval disables the job.
    pub async fn run(self, shutdown: CancellationToken) {
        if self.interval.is_zero() {
            info!("Leaderboard ticker disabled");
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.reset();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_once().await {
                        warn!(error = %e, "Leaderboard update failed");
                    }
                }
            }
        }
        info!("Leaderboard ticker stopped");
    }
}
