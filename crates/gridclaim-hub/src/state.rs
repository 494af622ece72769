//! Shared application state for the realtime server.
//!
//! [`AppState`] bundles the storage collaborators, the bus and the hub
//! handle that HTTP handlers and sessions need. [`AppState::new`] also
//! returns the [`Hub`] itself, which the caller spawns.

use std::sync::Arc;

use gridclaim_core::{ClaimResolver, GridClaimConfig, GridConfig};
use gridclaim_db::{HotStore, TileStore};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::dispatch::Dispatcher;
use crate::hub::{Hub, HubHandle};
use crate::leaderboard::LeaderboardTicker;
use crate::presence::{Presence, PresenceReconciler};
use crate::session::SessionConfig;

/// State shared by every handler and session.
pub struct AppState {
    /// Authoritative tile and user store.
    pub tiles: TileStore,
    /// Presence set and ranking.
    pub hot: HotStore,
    /// Cross-instance bus.
    pub bus: EventBus,
    /// Front door to this process's hub.
    pub hub: HubHandle,
    /// Presence updates.
    pub presence: Presence,
    /// Inbound message routing.
    pub dispatcher: Dispatcher,
    /// Board dimensions.
    pub grid: GridConfig,
    /// Per-connection timing.
    pub session: SessionConfig,
    /// Process-wide shutdown; sessions run on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the realtime layer over the given collaborators.
    pub fn new(
        config: &GridClaimConfig,
        tiles: TileStore,
        hot: HotStore,
        bus: EventBus,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, Hub) {
        let presence = Presence::new(hot.clone(), bus.clone());
        let (hub, handle) = Hub::new(&config.realtime, presence.clone());
        let resolver = ClaimResolver::new(tiles.clone(), hot.clone(), config.grid);
        let dispatcher = Dispatcher::new(
            resolver,
            handle.clone(),
            bus.clone(),
            config.realtime.claim_timeout(),
        );

        let state = Arc::new(Self {
            tiles,
            hot,
            bus,
            hub: handle,
            presence,
            dispatcher,
            grid: config.grid,
            session: SessionConfig::from(&config.realtime),
            shutdown,
        });
        (state, hub)
    }

    /// A presence reconciler for this process.
    pub fn reconciler(&self, config: &GridClaimConfig) -> PresenceReconciler {
        PresenceReconciler::new(
            self.presence.clone(),
            self.hot.clone(),
            self.tiles.clone(),
            self.hub.clone(),
            config.realtime.reconcile_interval(),
        )
    }

    /// A leaderboard ticker publishing on this process's bus.
    pub fn leaderboard_ticker(&self, config: &GridClaimConfig) -> LeaderboardTicker {
        LeaderboardTicker::new(
            self.tiles.clone(),
            self.bus.clone(),
            std::time::Duration::from_secs(config.leaderboard.interval_secs),
            config.leaderboard.limit,
        )
    }
}
