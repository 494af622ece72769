//! HTTP server lifecycle management.
//!
//! [`bind`] opens the listener during startup; [`serve`] runs the router
//! until the shutdown token fires, then stops accepting and lets in-flight
//! requests finish.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Listen address and CORS origin.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on.
    pub port: u16,
    /// Browser origin allowed by CORS.
    pub client_origin: String,
}

impl From<&gridclaim_core::InfrastructureConfig> for ServerConfig {
    fn from(config: &gridclaim_core::InfrastructureConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_origin: config.client_origin.clone(),
        }
    }
}

/// Bind the listener. Split from [`serve`] so bind failures surface during
/// startup.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    info!(%addr, "Board server listening");
    Ok(listener)
}

/// Serve until `shutdown` fires.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let router = build_router(state, &config.client_origin);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;
    info!("Board server stopped accepting connections");
    Ok(())
}

/// Errors that can occur when starting or running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
