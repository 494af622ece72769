//! Configuration, claim resolution and board queries for the gridclaim board.
//!
//! This crate holds the domain logic that does not touch sockets: loading
//! `gridclaim-config.yaml`, validating and applying tile claims, and
//! assembling the read-side board views.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading into strongly-typed structs
//! - [`claim`] -- [`ClaimResolver`] and its [`ClaimError`] outcomes
//! - [`board`] -- Board snapshot and aggregate statistics
//!
//! [`ClaimResolver`]: claim::ClaimResolver
//! [`ClaimError`]: claim::ClaimError

pub mod board;
pub mod claim;
pub mod config;

pub use claim::{ClaimError, ClaimResolver};
pub use config::{
    Backend, ConfigError, GridClaimConfig, GridConfig, InfrastructureConfig, LeaderboardConfig,
    LoggingConfig, RealtimeConfig,
};
