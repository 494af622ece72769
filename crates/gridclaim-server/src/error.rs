//! Error types for the board server binary.
//!
//! [`StartupError`] wraps every failure that aborts the process before or
//! while serving.

/// Top-level error for the board server binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: gridclaim_core::ConfigError,
    },

    /// `PostgreSQL` or `Dragonfly` was unreachable, or a migration failed.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: gridclaim_db::DbError,
    },

    /// The event bus could not be connected or subscribed.
    #[error("bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: gridclaim_hub::BusError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: gridclaim_hub::ServerError,
    },
}
