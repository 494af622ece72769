//! Board server binary for gridclaim.
//!
//! Wires the storage collaborators, the event bus, the hub and the HTTP
//! surface together, runs the background loops, and shuts everything down
//! on SIGINT or SIGTERM.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `gridclaim-config.yaml` (or defaults plus
//!    environment overrides)
//! 2. Initialize structured logging (tracing)
//! 3. Connect `PostgreSQL` (and migrate), `Dragonfly` and NATS, or build the
//!    in-memory doubles
//! 4. Seed the board
//! 5. Subscribe to the event bus
//! 6. Bind the HTTP listener
//! 7. Spawn the hub, bus subscription, presence reconciler and leaderboard
//!    ticker
//! 8. Serve until a shutdown signal, then drain within the grace window
//!
//! Every failure up to step 6 aborts the process.

mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gridclaim_core::{Backend, GridClaimConfig};
use gridclaim_db::{
    DragonflyPool, HotStore, MemoryHotStore, MemoryTileStore, PgTileStore, PostgresConfig,
    PostgresPool, TileStore,
};
use gridclaim_hub::server::{self, ServerConfig};
use gridclaim_hub::{AppState, EventBus, LocalBus, NatsBus};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::StartupError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "gridclaim-config.yaml";

/// How long shutdown waits for the server and background loops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Application entry point for the board server.
///
/// # Errors
///
/// Returns an error if configuration, a dependency, or the listener fails
/// during startup, or if the server fails while serving.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging.level);
    info!("gridclaim-server starting");
    info!(
        source,
        backend = ?config.infrastructure.backend,
        grid_width = config.grid.width,
        grid_height = config.grid.height,
        heartbeat_timeout_secs = config.realtime.heartbeat_timeout_secs,
        "Configuration loaded"
    );

    // 3. Connect collaborators.
    let Backends {
        tiles,
        hot,
        bus,
        postgres,
        dragonfly,
    } = connect_backends(&config).await?;
    info!(
        tile_store = tiles.name(),
        hot_store = hot.name(),
        bus = bus.name(),
        "Collaborators ready"
    );

    // 4. Seed the board.
    let seeded = tiles
        .seed_tiles(config.grid.width, config.grid.height)
        .await?;
    info!(inserted = seeded, "Board seeded");

    // 5. Build shared state and subscribe before accepting connections.
    let shutdown = CancellationToken::new();
    let (state, hub) = AppState::new(&config, tiles, hot, bus, shutdown.clone());
    let subscription = state.bus.subscribe().await?;

    // 6. Bind.
    let server_config = ServerConfig::from(&config.infrastructure);
    let listener = server::bind(&server_config).await?;

    // 7. Background loops.
    let mut tasks = JoinSet::new();
    tasks.spawn(hub.run(shutdown.clone()));
    tasks.spawn(subscription.run(state.hub.clone(), shutdown.clone()));
    tasks.spawn(state.reconciler(&config).run(shutdown.clone()));
    tasks.spawn(state.leaderboard_ticker(&config).run(shutdown.clone()));
    info!(tasks = tasks.len(), "Background tasks started");

    // 8. Serve.
    let server_shutdown = shutdown.clone();
    let server_state = Arc::clone(&state);
    let mut server = tokio::spawn(async move {
        server::serve(listener, &server_config, server_state, server_shutdown).await
    });

    let finished_early = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, draining");
            None
        }
        result = &mut server => Some(result),
    };
    shutdown.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async move {
        let served = match finished_early {
            Some(result) => result,
            None => server.await,
        };
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Background task panicked");
            }
        }
        served
    })
    .await;

    let served = match drained {
        Ok(Ok(served)) => served,
        Ok(Err(e)) => {
            error!(error = %e, "Server task panicked");
            Ok(())
        }
        Err(_elapsed) => {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Shutdown grace window elapsed with tasks still running"
            );
            Ok(())
        }
    };

    if let Some(postgres) = postgres {
        postgres.close().await;
    }
    if let Some(dragonfly) = dragonfly {
        dragonfly.quit().await;
    }
    served.map_err(StartupError::from)?;

    info!("gridclaim-server shutdown complete");
    Ok(())
}

/// Load `gridclaim-config.yaml` when present, otherwise defaults plus
/// environment overrides. Returns the config and where it came from.
fn load_config() -> Result<(GridClaimConfig, &'static str), StartupError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((GridClaimConfig::from_file(config_path)?, CONFIG_PATH))
    } else {
        Ok((GridClaimConfig::from_env()?, "defaults"))
    }
}

/// `RUST_LOG` wins; otherwise the configured level, falling back to `info`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_unset| EnvFilter::try_new(level))
        .unwrap_or_else(|_invalid| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Collaborators for one process. The pools are kept so they can be
/// closed after the drain.
struct Backends {
    tiles: TileStore,
    hot: HotStore,
    bus: EventBus,
    postgres: Option<PostgresPool>,
    dragonfly: Option<DragonflyPool>,
}

/// Build the storage collaborators and the bus for the configured backend.
async fn connect_backends(config: &GridClaimConfig) -> Result<Backends, StartupError> {
    let infra = &config.infrastructure;
    match infra.backend {
        Backend::InMemory => {
            warn!("Running on in-memory collaborators; state is lost on exit and not shared");
            Ok(Backends {
                tiles: TileStore::Memory(MemoryTileStore::new()),
                hot: HotStore::Memory(MemoryHotStore::new()),
                bus: EventBus::Local(LocalBus::default()),
                postgres: None,
                dragonfly: None,
            })
        }
        Backend::External => {
            let postgres = PostgresPool::connect(&PostgresConfig::new(&infra.postgres_url)).await?;
            postgres.run_migrations().await?;
            let dragonfly = DragonflyPool::connect(&infra.dragonfly_url).await?;
            let nats = NatsBus::connect(&infra.nats_url, &infra.bus_subject).await?;
            Ok(Backends {
                tiles: TileStore::Postgres(PgTileStore::new(postgres.pool().clone())),
                hot: HotStore::Dragonfly(dragonfly.clone()),
                bus: EventBus::Nats(nats),
                postgres: Some(postgres),
                dragonfly: Some(dragonfly),
            })
        }
    }
}

/// Resolve on SIGINT or SIGTERM. A handler that cannot be installed is
/// logged and never resolves, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
