//! Shared type definitions for the gridclaim realtime board.
//!
//! This crate is the single source of truth for the entities and wire
//! envelopes used across the workspace. Types flow downstream to
//! `TypeScript` via `ts-rs` for the browser client.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`board`] -- Tiles, users, leaderboard rows and board statistics
//! - [`events`] -- Outbound [`ServerEvent`] envelopes and their payloads
//! - [`messages`] -- Inbound [`ClientMessage`] parsing

pub mod board;
pub mod events;
pub mod ids;
pub mod messages;

// Re-export all public types at crate root for convenience.
pub use board::{BoardSnapshot, BoardStats, LeaderboardEntry, Tile, User};
pub use events::{
    ClaimRejectedPayload, ErrorCode, ErrorPayload, InitBoardPayload, LeaderboardUpdatePayload,
    PongPayload, RejectReason, ServerEvent, TileClaimedPayload, UserJoinedPayload,
    UserLeftPayload,
};
pub use ids::UserId;
pub use messages::{ClientMessage, ParseError};
