//! One client connection: connect sequence, read loop and write loop.
//!
//! The read loop runs on the task that accepted the connection; the write
//! loop runs on its own task and is the only writer to the socket. They
//! share a stop token, a child of the process shutdown token, and whichever
//! side fails first cancels it. Teardown is always routed through
//! [`HubHandle::unregister`], so the hub decides whether this session still
//! needs its presence removal and `USER_LEFT`.
//!
//! Both loops are generic over the socket halves so tests can drive a
//! session with in-memory channels.
//!
//! [`HubHandle::unregister`]: crate::hub::HubHandle::unregister

use std::fmt::Display;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use gridclaim_core::RealtimeConfig;
use gridclaim_types::{ErrorCode, ErrorPayload, InitBoardPayload, ServerEvent, User};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HubError, PresenceError};
use crate::hub::{Frame, SessionId};
use crate::state::AppState;

/// Per-connection timing and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Read deadline, refreshed by every pong.
    pub pong_wait: Duration,
    /// Interval between server pings on an otherwise idle socket.
    pub ping_period: Duration,
    /// Upper bound on a single socket write.
    pub write_wait: Duration,
    /// Largest accepted inbound text frame in bytes.
    pub max_frame_bytes: usize,
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
}

impl From<&RealtimeConfig> for SessionConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            write_wait: config.write_wait(),
            max_frame_bytes: usize::try_from(config.max_frame_bytes).unwrap_or(usize::MAX),
            send_queue_capacity: usize::try_from(config.send_queue_capacity)
                .unwrap_or(1)
                .max(1),
        }
    }
}

/// Run a session for `user` over an upgraded socket until it ends.
pub async fn serve<Si, St, E>(state: Arc<AppState>, user: User, sink: Si, stream: St)
where
    Si: Sink<Message> + Send + Unpin + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Send + Unpin,
    E: Display + Send,
{
    let config = state.session;
    let session_id = state.hub.next_session_id();
    let (outbound, queue) = mpsc::channel(config.send_queue_capacity);
    let stop = state.shutdown.child_token();
    let writer = tokio::spawn(write_loop(sink, queue, stop.clone(), config, session_id));

    info!(session_id = %session_id, user_id = %user.id, username = %user.username, "Session opened");
    match open(&state, session_id, &user, outbound).await {
        Ok(()) => read_loop(&state, session_id, &user, stream, &stop).await,
        Err(e) => warn!(session_id = %session_id, user_id = %user.id, error = %e, "Connect sequence failed"),
    }

    stop.cancel();
    match state.hub.unregister(session_id).await {
        Ok(true) => debug!(session_id = %session_id, "Session unregistered"),
        Ok(false) => debug!(session_id = %session_id, "Session already evicted"),
        Err(e) => debug!(session_id = %session_id, error = %e, "Unregister skipped"),
    }
    if let Err(e) = writer.await {
        warn!(session_id = %session_id, error = %e, "Write loop panicked");
    }
    info!(session_id = %session_id, user_id = %user.id, "Session closed");
}

/// Register, mark online, send the snapshot, then announce the join.
async fn open(
    state: &AppState,
    session_id: SessionId,
    user: &User,
    outbound: mpsc::Sender<Frame>,
) -> Result<(), PresenceError> {
    state.hub.register(session_id, user.clone(), outbound).await?;
    let online_count = state.presence.mark_online(user.id).await?;
    if let Err(e) = state.tiles.update_last_seen(user.id).await {
        warn!(user_id = %user.id, error = %e, "Failed to update last seen");
    }

    let init = ServerEvent::InitBoard(InitBoardPayload {
        tiles: state.tiles.get_all_tiles().await?,
        user: user.clone(),
        online_count,
        grid_width: state.grid.width,
        grid_height: state.grid.height,
    });
    state.hub.send_to_session(session_id, &init).await?;

    if let Err(e) = state.presence.announce_join(user, online_count).await {
        warn!(user_id = %user.id, error = %e, "Failed to announce join");
    }
    Ok(())
}

async fn read_loop<St, E>(
    state: &AppState,
    session_id: SessionId,
    user: &User,
    mut stream: St,
    stop: &CancellationToken,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let config = state.session;
    let mut deadline = deadline_after(config.pong_wait);
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => return,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                info!(session_id = %session_id, "Read deadline expired");
                return;
            }
            Ok(None) => {
                debug!(session_id = %session_id, "Client disconnected");
                return;
            }
            Ok(Some(Err(e))) => {
                debug!(session_id = %session_id, error = %e, "Read failed");
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        if handle_message(state, session_id, user, message, &mut deadline)
            .await
            .is_break()
        {
            return;
        }
    }
}

/// Act on one inbound frame. `Break` ends the session.
async fn handle_message(
    state: &AppState,
    session_id: SessionId,
    user: &User,
    message: Message,
    deadline: &mut Instant,
) -> ControlFlow<()> {
    let config = state.session;
    let handled: Result<(), HubError> = match message {
        Message::Text(text) => {
            if text.len() > config.max_frame_bytes {
                warn!(session_id = %session_id, bytes = text.len(), "Inbound frame too large");
                return ControlFlow::Break(());
            }
            state.dispatcher.handle_text(session_id, user, text.as_str()).await
        }
        Message::Binary(_) => {
            let reply = ServerEvent::Error(ErrorPayload {
                code: ErrorCode::BadFrame,
                message: String::from("binary frames are not supported"),
            });
            state.hub.send_to_session(session_id, &reply).await
        }
        Message::Pong(_) => {
            *deadline = deadline_after(config.pong_wait);
            state.hub.heartbeat(session_id).await
        }
        Message::Ping(_) => Ok(()),
        Message::Close(_) => {
            debug!(session_id = %session_id, "Client sent close");
            return ControlFlow::Break(());
        }
    };
    if handled.is_err() {
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

async fn write_loop<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Frame>,
    stop: CancellationToken,
    config: SessionConfig,
    session_id: SessionId,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ping = tokio::time::interval(config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.reset();

    loop {
        let message = tokio::select! {
            biased;
            () = stop.cancelled() => {
                close(&mut sink, config.write_wait).await;
                break;
            }
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(frame),
                None => {
                    close(&mut sink, config.write_wait).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        match tokio::time::timeout(config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %session_id, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                info!(session_id = %session_id, "Write deadline expired");
                break;
            }
        }
    }
    stop.cancel();
}

async fn close<Si>(sink: &mut Si, write_wait: Duration)
where
    Si: Sink<Message> + Unpin,
{
    let _ = tokio::time::timeout(write_wait, sink.send(Message::Close(None))).await;
}

fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait).unwrap_or(now)
}
