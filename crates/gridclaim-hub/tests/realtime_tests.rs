//! Hub, session, bus and presence behavior against in-memory backends.
//!
//! Multi-process scenarios run several hubs in one runtime sharing a
//! [`LocalBus`] and the same stores, which is exactly what separate
//! processes share in production.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::Utc;
use futures::StreamExt as _;
use gridclaim_core::GridClaimConfig;
use gridclaim_db::{HotStore, MemoryHotStore, MemoryTileStore, TileStore};
use gridclaim_hub::{AppState, EventBus, Frame, LocalBus, Subscription, session};
use gridclaim_types::{PongPayload, ServerEvent, User, UserId};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Helpers
// =========================================================================

struct Cluster {
    tiles: MemoryTileStore,
    hot: MemoryHotStore,
    bus: LocalBus,
}

impl Cluster {
    async fn new(width: u32, height: u32) -> Self {
        let tiles = MemoryTileStore::new();
        tiles.seed_tiles(width, height).await.unwrap();
        Self {
            tiles,
            hot: MemoryHotStore::new(),
            bus: LocalBus::default(),
        }
    }

    async fn user(&self, name: &str) -> User {
        let user = User {
            id: UserId::new(),
            username: name.to_owned(),
            color: String::from("#4488cc"),
            created_at: Utc::now(),
            last_seen: Utc::now(),
        };
        self.tiles.insert_user(user.clone()).await.unwrap();
        user
    }

    /// Start one process: hub task plus bus subscription.
    async fn node(&self, config: &GridClaimConfig) -> Node {
        let shutdown = CancellationToken::new();
        let (state, hub) = AppState::new(
            config,
            TileStore::Memory(self.tiles.clone()),
            HotStore::Memory(self.hot.clone()),
            EventBus::Local(self.bus.clone()),
            shutdown.clone(),
        );
        let subscription = state.bus.subscribe().await.unwrap();
        tokio::spawn(subscription.run(state.hub.clone(), shutdown.clone()));
        let hub_task = tokio::spawn(hub.run(shutdown.clone()));
        Node {
            state,
            shutdown,
            hub_task,
        }
    }

    /// A raw listener on the bus, standing in for another process.
    async fn observer(&self) -> broadcast::Receiver<Frame> {
        match EventBus::Local(self.bus.clone()).subscribe().await.unwrap() {
            Subscription::Local(receiver) => receiver,
            Subscription::Nats { .. } => panic!("local bus returned a NATS subscription"),
        }
    }
}

struct Node {
    state: Arc<AppState>,
    shutdown: CancellationToken,
    hub_task: JoinHandle<()>,
}

fn config(width: u32, height: u32) -> GridClaimConfig {
    let mut config = GridClaimConfig::default();
    config.grid.width = width;
    config.grid.height = height;
    config
}

fn parse(frame: &str) -> Value {
    serde_json::from_str(frame).unwrap()
}

/// Next queued frame for a directly registered session.
async fn next_frame(queue: &mut mpsc::Receiver<Frame>) -> Value {
    let frame = tokio::time::timeout(WAIT, queue.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("queue closed");
    parse(frame.as_str())
}

/// Next bus frame of the given type.
async fn next_of_type(observer: &mut broadcast::Receiver<Frame>, event_type: &str) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let value = parse(observer.recv().await.unwrap().as_str());
            if value["type"] == event_type {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for bus event")
}

/// Next text frame written to a socket, skipping pings.
async fn next_text(socket: &mut futures::channel::mpsc::UnboundedReceiver<Message>) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for server frame")
            .expect("socket closed");
        if let Message::Text(text) = message {
            return parse(text.as_str());
        }
    }
}

// =========================================================================
// Hub
// =========================================================================

#[tokio::test]
async fn broadcast_reaches_sessions_registered_at_call_time() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let hub = &node.state.hub;
    let alice = cluster.user("alice").await;
    let bob = cluster.user("bob").await;

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let first = hub.next_session_id();
    let second = hub.next_session_id();

    hub.register(first, alice, tx_a).await.unwrap();
    hub.broadcast(&ServerEvent::Pong(PongPayload {})).await.unwrap();
    hub.register(second, bob.clone(), tx_b).await.unwrap();
    hub.send_to_user(bob.id, &ServerEvent::Pong(PongPayload {}))
        .await
        .unwrap();
    assert_eq!(hub.session_count().await.unwrap(), 2);

    assert_eq!(next_frame(&mut rx_a).await["type"], "PONG");
    assert_eq!(next_frame(&mut rx_b).await["type"], "PONG");
    assert!(rx_a.try_recv().is_err(), "targeted send leaked to another user");
    assert!(rx_b.try_recv().is_err(), "late session saw an earlier broadcast");
}

#[tokio::test]
async fn targeted_send_to_absent_user_is_dropped() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let hub = &node.state.hub;
    hub.send_to_user(UserId::new(), &ServerEvent::Pong(PongPayload {}))
        .await
        .unwrap();
    assert_eq!(hub.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn slow_consumer_is_evicted_with_single_teardown() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let hub = &node.state.hub;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;
    let bob = cluster.user("bob").await;

    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    let (fast_tx, mut fast_rx) = mpsc::channel(8);
    let slow = hub.next_session_id();
    let fast = hub.next_session_id();
    hub.register(slow, alice.clone(), slow_tx).await.unwrap();
    hub.register(fast, bob, fast_tx).await.unwrap();
    node.state.presence.mark_online(alice.id).await.unwrap();

    for _ in 0..3 {
        hub.broadcast(&ServerEvent::Pong(PongPayload {})).await.unwrap();
    }
    assert_eq!(hub.session_count().await.unwrap(), 1);

    // The fast session kept receiving while the slow one was dropped.
    let mut pongs = 0;
    while pongs < 3 {
        if next_frame(&mut fast_rx).await["type"] == "PONG" {
            pongs += 1;
        }
    }
    assert!(slow_rx.recv().await.is_some());
    assert!(slow_rx.recv().await.is_none(), "evicted queue should be closed");

    let left = next_of_type(&mut observer, "USER_LEFT").await;
    assert_eq!(left["payload"]["userId"], alice.id.to_string());
    assert_eq!(left["payload"]["onlineCount"], 0);

    assert!(!hub.unregister(slow).await.unwrap(), "second teardown must be a no-op");
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(frame) = observer.try_recv() {
        assert_ne!(parse(frame.as_str())["type"], "USER_LEFT", "teardown ran twice");
    }
}

#[tokio::test(start_paused = true)]
async fn liveness_sweep_evicts_only_silent_sessions() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let hub = &node.state.hub;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;
    let bob = cluster.user("bob").await;

    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, _rx_b) = mpsc::channel(8);
    let pinging = hub.next_session_id();
    let silent = hub.next_session_id();
    hub.register(pinging, alice.clone(), tx_a).await.unwrap();
    hub.register(silent, bob.clone(), tx_b).await.unwrap();
    node.state.presence.mark_online(alice.id).await.unwrap();
    node.state.presence.mark_online(bob.id).await.unwrap();

    // Sweeps at 30s and 60s find the silent session within the timeout.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        hub.heartbeat(pinging).await.unwrap();
    }
    assert_eq!(hub.session_count().await.unwrap(), 2);

    // The 120s sweep finds it 120s stale.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        hub.heartbeat(pinging).await.unwrap();
    }
    assert_eq!(hub.connected_users().await.unwrap(), vec![alice.id]);

    let left = next_of_type(&mut observer, "USER_LEFT").await;
    assert_eq!(left["payload"]["userId"], bob.id.to_string());
    assert_eq!(left["payload"]["username"], "bob");
    assert_eq!(left["payload"]["onlineCount"], 1);
}

#[tokio::test]
async fn shutdown_tears_down_every_session() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let alice = cluster.user("alice").await;
    let (tx, mut rx) = mpsc::channel(8);
    let id = node.state.hub.next_session_id();
    node.state.hub.register(id, alice.clone(), tx).await.unwrap();
    node.state.presence.mark_online(alice.id).await.unwrap();

    node.shutdown.cancel();
    tokio::time::timeout(WAIT, node.hub_task).await.unwrap().unwrap();

    assert!(rx.recv().await.is_none());
    assert_eq!(cluster.hot.online_count().await.unwrap(), 0);
    assert!(node.state.hub.session_count().await.is_err());
}

// =========================================================================
// Cross-instance fan-out
// =========================================================================

#[tokio::test]
async fn claim_on_one_process_reaches_another() {
    let cluster = Cluster::new(4, 2).await;
    let process_a = cluster.node(&config(4, 2)).await;
    let process_b = cluster.node(&config(4, 2)).await;
    let alice = cluster.user("alice").await;
    let bob = cluster.user("bob").await;

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let on_a = process_a.state.hub.next_session_id();
    let on_b = process_b.state.hub.next_session_id();
    process_a.state.hub.register(on_a, alice.clone(), tx_a).await.unwrap();
    process_b.state.hub.register(on_b, bob, tx_b).await.unwrap();

    process_a
        .state
        .dispatcher
        .handle_text(on_a, &alice, r#"{"type":"CLAIM_TILE","payload":{"tileId":5}}"#)
        .await
        .unwrap();

    let seen_a = next_frame(&mut rx_a).await;
    let seen_b = next_frame(&mut rx_b).await;
    assert_eq!(seen_a, seen_b);
    assert_eq!(seen_b["type"], "TILE_CLAIMED");
    assert_eq!(seen_b["payload"]["tileId"], 5);
    assert_eq!(seen_b["payload"]["x"], 1);
    assert_eq!(seen_b["payload"]["y"], 1);
    assert_eq!(seen_b["payload"]["userId"], alice.id.to_string());
    assert_eq!(seen_b["payload"]["username"], "alice");
    assert!(seen_b["payload"]["previousOwner"].is_null());
}

#[tokio::test]
async fn rejections_go_only_to_the_claimant() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let alice = cluster.user("alice").await;
    let bob = cluster.user("bob").await;

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let hub = &node.state.hub;
    let on_a = hub.next_session_id();
    let on_b = hub.next_session_id();
    hub.register(on_a, alice.clone(), tx_a).await.unwrap();
    hub.register(on_b, bob.clone(), tx_b).await.unwrap();
    let dispatcher = &node.state.dispatcher;

    dispatcher
        .handle_text(on_a, &alice, r#"{"type":"CLAIM_TILE","payload":{"tileId":0}}"#)
        .await
        .unwrap();
    assert_eq!(next_frame(&mut rx_a).await["type"], "TILE_CLAIMED");
    assert_eq!(next_frame(&mut rx_b).await["type"], "TILE_CLAIMED");

    dispatcher
        .handle_text(on_b, &bob, r#"{"type":"CLAIM_TILE","payload":{"tileId":0}}"#)
        .await
        .unwrap();
    let rejected = next_frame(&mut rx_b).await;
    assert_eq!(rejected["type"], "CLAIM_REJECTED");
    assert_eq!(rejected["payload"]["reason"], "ALREADY_CLAIMED");

    dispatcher
        .handle_text(on_b, &bob, r#"{"type":"CLAIM_TILE","payload":{"tileId":-1}}"#)
        .await
        .unwrap();
    let rejected = next_frame(&mut rx_b).await;
    assert_eq!(rejected["payload"]["tileId"], -1);
    assert_eq!(rejected["payload"]["reason"], "INVALID_TILE");

    cluster.tiles.set_unavailable(true);
    dispatcher
        .handle_text(on_b, &bob, r#"{"type":"CLAIM_TILE","payload":{"tileId":1}}"#)
        .await
        .unwrap();
    assert_eq!(next_frame(&mut rx_b).await["payload"]["reason"], "SERVER_ERROR");

    assert_eq!(hub.session_count().await.unwrap(), 2);
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn malformed_frames_get_error_codes() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let alice = cluster.user("alice").await;
    let (tx, mut rx) = mpsc::channel(8);
    let id = node.state.hub.next_session_id();
    node.state.hub.register(id, alice.clone(), tx).await.unwrap();

    let cases = [
        ("not json", "BAD_FRAME"),
        (r#"{"type":"DANCE","payload":{}}"#, "UNKNOWN_MESSAGE"),
        (r#"{"type":"CLAIM_TILE","payload":{"tileId":"five"}}"#, "BAD_PAYLOAD"),
    ];
    for (text, code) in cases {
        node.state
            .dispatcher
            .handle_text(id, &alice, text)
            .await
            .unwrap();
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["type"], "ERROR", "{text}");
        assert_eq!(reply["payload"]["code"], code, "{text}");
    }
    assert_eq!(cluster.tiles.claim_record_count().await, 0);
}

// =========================================================================
// Sessions over a socket
// =========================================================================

#[tokio::test]
async fn session_lifecycle_over_socket() {
    let cluster = Cluster::new(2, 1).await;
    let node = cluster.node(&config(2, 1)).await;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;

    let (sink, mut server_frames) = futures::channel::mpsc::unbounded::<Message>();
    let (client, stream) = futures::channel::mpsc::unbounded::<Result<Message, std::io::Error>>();
    let session = tokio::spawn(session::serve(Arc::clone(&node.state), alice.clone(), sink, stream));

    let init = next_text(&mut server_frames).await;
    assert_eq!(init["type"], "INIT_BOARD");
    assert_eq!(init["payload"]["tiles"].as_array().unwrap().len(), 2);
    assert_eq!(init["payload"]["user"]["username"], "alice");
    assert_eq!(init["payload"]["onlineCount"], 1);
    assert_eq!(init["payload"]["gridWidth"], 2);

    let joined = next_text(&mut server_frames).await;
    assert_eq!(joined["type"], "USER_JOINED");
    assert_eq!(joined["payload"]["userId"], alice.id.to_string());

    client
        .unbounded_send(Ok(Message::Text(r#"{"type":"PING"}"#.into())))
        .unwrap();
    assert_eq!(next_text(&mut server_frames).await["type"], "PONG");

    client
        .unbounded_send(Ok(Message::Text(
            r#"{"type":"CLAIM_TILE","payload":{"tileId":1}}"#.into(),
        )))
        .unwrap();
    let claimed = next_text(&mut server_frames).await;
    assert_eq!(claimed["type"], "TILE_CLAIMED");
    assert_eq!(claimed["payload"]["color"], "#4488cc");

    drop(client);
    tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

    let left = next_of_type(&mut observer, "USER_LEFT").await;
    assert_eq!(left["payload"]["onlineCount"], 0);
    assert_eq!(node.state.hub.session_count().await.unwrap(), 0);
    assert_eq!(cluster.hot.online_count().await.unwrap(), 0);
}

#[tokio::test]
async fn oversized_frame_ends_session() {
    let cluster = Cluster::new(2, 1).await;
    let mut cfg = config(2, 1);
    cfg.realtime.max_frame_bytes = 64;
    let node = cluster.node(&cfg).await;
    let alice = cluster.user("alice").await;

    let (sink, _server_frames) = futures::channel::mpsc::unbounded::<Message>();
    let (client, stream) = futures::channel::mpsc::unbounded::<Result<Message, std::io::Error>>();
    let session = tokio::spawn(session::serve(Arc::clone(&node.state), alice, sink, stream));

    client
        .unbounded_send(Ok(Message::Text("x".repeat(65).into())))
        .unwrap();
    tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(node.state.hub.session_count().await.unwrap(), 0);
}

// =========================================================================
// Presence reconciliation and leaderboard
// =========================================================================

#[tokio::test]
async fn reconciler_drops_users_not_connected_here() {
    let cluster = Cluster::new(2, 1).await;
    let cfg = config(2, 1);
    let node = cluster.node(&cfg).await;
    let mut observer = cluster.observer().await;
    let local = cluster.user("local").await;
    let elsewhere = cluster.user("elsewhere").await;
    let unknown = UserId::new();

    let (tx, _rx) = mpsc::channel(8);
    let id = node.state.hub.next_session_id();
    node.state.hub.register(id, local.clone(), tx).await.unwrap();
    for user_id in [local.id, elsewhere.id, unknown] {
        cluster.hot.add_online(user_id).await.unwrap();
    }

    let removed = node.state.reconciler(&cfg).reconcile_once().await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cluster.hot.online_members().await.unwrap(), vec![local.id]);

    let left = next_of_type(&mut observer, "USER_LEFT").await;
    assert_eq!(left["payload"]["userId"], elsewhere.id.to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(frame) = observer.try_recv() {
        assert_ne!(parse(frame.as_str())["type"], "USER_LEFT", "unknown user announced");
    }

    assert_eq!(node.state.reconciler(&cfg).reconcile_once().await.unwrap(), 0);
}

#[tokio::test]
async fn teardown_announces_departure_when_hot_store_is_down() {
    let cluster = Cluster::new(2, 1).await;
    let cfg = config(2, 1);
    let node = cluster.node(&cfg).await;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;

    let (tx, _rx) = mpsc::channel(8);
    let id = node.state.hub.next_session_id();
    node.state.hub.register(id, alice.clone(), tx).await.unwrap();
    node.state.presence.mark_online(alice.id).await.unwrap();

    cluster.hot.set_unavailable(true);
    assert!(node.state.hub.unregister(id).await.unwrap());

    let left = next_of_type(&mut observer, "USER_LEFT").await;
    assert_eq!(left["payload"]["userId"], alice.id.to_string());
    assert_eq!(left["payload"]["username"], "alice");
    assert_eq!(left["payload"]["onlineCount"], 0);
}

#[tokio::test]
async fn reconcile_continues_past_a_failing_entry() {
    let cluster = Cluster::new(2, 1).await;
    let cfg = config(2, 1);
    let node = cluster.node(&cfg).await;
    let mut observer = cluster.observer().await;
    let bob = cluster.user("bob").await;
    let carol = cluster.user("carol").await;
    for user_id in [bob.id, carol.id] {
        cluster.hot.add_online(user_id).await.unwrap();
    }
    cluster.hot.pin_online(bob.id).await;

    let removed = node.state.reconciler(&cfg).reconcile_once().await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(cluster.hot.online_members().await.unwrap(), vec![bob.id]);

    let mut announced = Vec::new();
    for _ in 0..2 {
        let left = next_of_type(&mut observer, "USER_LEFT").await;
        announced.push(left["payload"]["username"].as_str().unwrap().to_owned());
    }
    announced.sort();
    assert_eq!(announced, ["bob", "carol"]);
}

#[tokio::test]
async fn leaderboard_tick_publishes_ranking() {
    let cluster = Cluster::new(2, 1).await;
    let cfg = config(2, 1);
    let node = cluster.node(&cfg).await;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;
    cluster.tiles.claim_tile(0, alice.id).await.unwrap();

    let rows = node.state.leaderboard_ticker(&cfg).tick_once().await.unwrap();
    assert_eq!(rows, 1);
    let update = next_of_type(&mut observer, "LEADERBOARD_UPDATE").await;
    assert_eq!(update["payload"]["leaderboard"][0]["username"], "alice");
    assert_eq!(update["payload"]["leaderboard"][0]["tileCount"], 1);
    assert_eq!(update["payload"]["leaderboard"][0]["rank"], 1);
}

#[tokio::test(start_paused = true)]
async fn leaderboard_ticker_waits_one_interval_before_publishing() {
    let cluster = Cluster::new(2, 1).await;
    let cfg = config(2, 1);
    let node = cluster.node(&cfg).await;
    let mut observer = cluster.observer().await;
    let alice = cluster.user("alice").await;
    cluster.tiles.claim_tile(0, alice.id).await.unwrap();

    let interval = Duration::from_secs(cfg.leaderboard.interval_secs);
    let token = CancellationToken::new();
    let ticker = tokio::spawn(node.state.leaderboard_ticker(&cfg).run(token.clone()));

    tokio::time::sleep(interval / 2).await;
    while let Ok(frame) = observer.try_recv() {
        assert_ne!(
            parse(frame.as_str())["type"],
            "LEADERBOARD_UPDATE",
            "published before the first interval"
        );
    }

    tokio::time::sleep(interval).await;
    let update = next_of_type(&mut observer, "LEADERBOARD_UPDATE").await;
    assert_eq!(update["payload"]["leaderboard"][0]["username"], "alice");

    token.cancel();
    ticker.await.unwrap();
}
