//! Integration tests for the HTTP surface.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. Storage is the in-memory backend.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use gridclaim_core::GridClaimConfig;
use gridclaim_db::{HotStore, MemoryHotStore, MemoryTileStore, TileStore};
use gridclaim_hub::{AppState, EventBus, LocalBus, build_router};
use gridclaim_types::{User, UserId};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Fixture {
    state: Arc<AppState>,
    tiles: MemoryTileStore,
    alice: User,
}

async fn make_test_state() -> Fixture {
    let mut config = GridClaimConfig::default();
    config.grid.width = 2;
    config.grid.height = 1;

    let tiles = MemoryTileStore::new();
    let hot = MemoryHotStore::new();
    tiles.seed_tiles(2, 1).await.unwrap();

    let alice = User {
        id: UserId::new(),
        username: String::from("alice"),
        color: String::from("#ff8800"),
        created_at: Utc::now(),
        last_seen: Utc::now(),
    };
    tiles.insert_user(alice.clone()).await.unwrap();
    tiles.claim_tile(0, alice.id).await.unwrap();
    hot.add_online(alice.id).await.unwrap();

    let (state, _hub) = AppState::new(
        &config,
        TileStore::Memory(tiles.clone()),
        HotStore::Memory(hot),
        EventBus::Local(LocalBus::default()),
        CancellationToken::new(),
    );
    Fixture {
        state,
        tiles,
        alice,
    }
}

async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state, "http://localhost:5173")
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// =========================================================================
// REST
// =========================================================================

#[tokio::test]
async fn health_reports_ok() {
    let fixture = make_test_state().await;
    let (status, json) = get(fixture.state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn board_lists_tiles_with_owner() {
    let fixture = make_test_state().await;
    let (status, json) = get(fixture.state, "/api/board").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["gridWidth"], 2);
    assert_eq!(json["gridHeight"], 1);
    assert_eq!(json["totalTiles"], 2);
    assert_eq!(json["claimedTiles"], 1);
    assert_eq!(json["tiles"][0]["ownerUsername"], "alice");
    assert!(json["tiles"][1]["ownerId"].is_null());
}

#[tokio::test]
async fn stats_count_claimed_and_unclaimed() {
    let fixture = make_test_state().await;
    let (status, json) = get(fixture.state, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["totalTiles"], 2);
    assert_eq!(json["claimedTiles"], 1);
    assert_eq!(json["unclaimedTiles"], 1);
    assert_eq!(json["onlineUsers"], 1);
    assert_eq!(json["totalUsers"], 1);
    assert!(json["lastActivity"].is_string());
}

#[tokio::test]
async fn stats_fail_with_json_error_when_store_is_down() {
    let fixture = make_test_state().await;
    fixture.tiles.set_unavailable(true);
    let (status, json) = get(fixture.state, "/api/stats").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], 500);
    assert!(json["error"].is_string());
}

// =========================================================================
// Socket admission
// =========================================================================

#[tokio::test]
async fn ws_requires_user_id() {
    let fixture = make_test_state().await;
    let (status, json) = get(fixture.state, "/ws").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn ws_rejects_malformed_user_id() {
    let fixture = make_test_state().await;
    let (status, _) = get(fixture.state, "/ws?userId=not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ws_rejects_unknown_user() {
    let fixture = make_test_state().await;
    let uri = format!("/ws?userId={}", UserId::new());
    let (status, json) = get(fixture.state, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn ws_reports_store_failure() {
    let fixture = make_test_state().await;
    fixture.tiles.set_unavailable(true);
    let uri = format!("/ws?userId={}", fixture.alice.id);
    let (status, _) = get(fixture.state, &uri).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn ws_known_user_without_upgrade_is_refused() {
    let fixture = make_test_state().await;
    let uri = format!("/ws?userId={}", fixture.alice.id);
    let (status, _) = get(fixture.state, &uri).await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_allows_configured_origin_only() {
    let fixture = make_test_state().await;
    let router = build_router(fixture.state, "http://localhost:5173");

    let allowed = router
        .clone()
        .oneshot(
            Request::get("/health")
                .header("origin", "http://localhost:5173")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );

    let foreign = router
        .oneshot(
            Request::get("/health")
                .header("origin", "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(foreign.headers().get("access-control-allow-origin").is_none());
}
