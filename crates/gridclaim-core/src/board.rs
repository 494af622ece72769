//! Read-side board queries shared by the HTTP API and the connect path.

use gridclaim_db::{DbError, HotStore, TileStore};
use gridclaim_types::{BoardSnapshot, BoardStats};

use crate::config::GridConfig;

/// Full tile list plus grid dimensions.
///
/// # Errors
///
/// Propagates store failures.
pub async fn board_snapshot(tiles: &TileStore, grid: GridConfig) -> Result<BoardSnapshot, DbError> {
    let all = tiles.get_all_tiles().await?;
    let claimed = all.iter().filter(|t| t.is_claimed()).count();
    Ok(BoardSnapshot {
        total_tiles: u64::try_from(all.len()).unwrap_or(u64::MAX),
        claimed_tiles: u64::try_from(claimed).unwrap_or(u64::MAX),
        grid_width: grid.width,
        grid_height: grid.height,
        tiles: all,
    })
}

/// Aggregate counters for `/api/stats`.
///
/// The total comes from the grid rather than a row count so an unseeded or
/// partially seeded store still reports the configured board size.
///
/// # Errors
///
/// Propagates store failures.
pub async fn board_stats(
    tiles: &TileStore,
    hot: &HotStore,
    grid: GridConfig,
) -> Result<BoardStats, DbError> {
    let (_, claimed) = tiles.count_tiles().await?;
    let total = grid.tile_count();
    Ok(BoardStats {
        total_tiles: total,
        claimed_tiles: claimed,
        unclaimed_tiles: total.saturating_sub(claimed),
        online_users: hot.online_count().await?,
        total_users: tiles.count_users().await?,
        last_activity: tiles.last_activity().await?,
    })
}
