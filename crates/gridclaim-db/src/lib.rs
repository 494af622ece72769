//! Storage collaborators for the gridclaim board (`PostgreSQL` + `Dragonfly`).
//!
//! `PostgreSQL` is the authoritative store for tiles, users and the claim
//! history; its conditional update is the only concurrency guard on tile
//! ownership. `Dragonfly` holds cluster-wide hot state: the online presence
//! set and the claim ranking.
//!
//! # Architecture
//!
//! ```text
//! Claim Resolver / Presence / HTTP
//!     |
//!     +-- TileStore --> PgTileStore (PostgresPool)  | MemoryTileStore
//!     |
//!     +-- HotStore ---> DragonflyPool               | MemoryHotStore
//! ```
//!
//! # Modules
//!
//! - [`store`] -- Enum-dispatched [`TileStore`] and [`HotStore`] contracts
//! - [`postgres`] -- `PostgreSQL` connection pool and migrations
//! - [`tile_store`] -- Tile, user and leaderboard queries
//! - [`dragonfly`] -- Presence set and ranking sorted set
//! - [`memory`] -- In-memory doubles
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod tile_store;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use memory::{MemoryHotStore, MemoryTileStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{HotStore, TileStore};
pub use tile_store::{LeaderboardRow, PgTileStore, TileRow, UserRow};
