//! Realtime synchronization layer for the gridclaim board.
//!
//! This crate provides:
//!
//! - The **hub**, a single-owner task holding this process's sessions,
//!   reached only through [`HubHandle`] commands
//! - **Sessions** with separate read and write loops, heartbeats and
//!   bounded outbound queues
//! - The **cross-instance bus** ([`EventBus`]) that carries every accepted
//!   event to every process's hub
//! - **Presence** tracking plus the periodic [`PresenceReconciler`]
//! - The periodic [`LeaderboardTicker`]
//! - The Axum router: `/ws`, `/health`, `/api/board`, `/api/stats`
//!
//! # Data flow
//!
//! ```text
//! socket -> session read loop -> Dispatcher -> ClaimResolver
//!                                    |
//!                                    v
//!                                EventBus --(every process)--> Hub -> session queues -> sockets
//! ```

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod leaderboard;
pub mod presence;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use bus::{EventBus, LocalBus, NatsBus, Subscription};
pub use dispatch::Dispatcher;
pub use error::{ApiError, BusError, HubError, LeaderboardError, PresenceError};
pub use hub::{Frame, Hub, HubHandle, SessionId};
pub use leaderboard::LeaderboardTicker;
pub use presence::{Presence, PresenceReconciler};
pub use router::build_router;
pub use server::{ServerConfig, ServerError};
pub use session::SessionConfig;
pub use state::AppState;
