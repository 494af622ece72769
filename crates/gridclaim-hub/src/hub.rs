//! The per-process connection registry.
//!
//! One task owns both session maps and is reached only through
//! [`HubHandle`] commands, processed in arrival order. Nothing else touches
//! the maps, so two properties hold by construction:
//!
//! - Teardown runs exactly once per session. A session leaves the map in
//!   exactly one place ([`Hub::evict`]), and only the call that actually
//!   removed it schedules the presence removal and the `USER_LEFT` event.
//! - Broadcast never blocks. Frames are offered with `try_send`; a session
//!   whose queue is full is evicted after the fan-out completes.
//!
//! The liveness sweep runs inside the same task on a fixed interval.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use gridclaim_core::RealtimeConfig;
use gridclaim_types::{ServerEvent, User, UserId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::presence::Presence;

/// One serialized outbound text frame, shared cheaply between sessions.
pub type Frame = Utf8Bytes;

/// Process-local session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

enum HubCommand {
    Register {
        session_id: SessionId,
        user: User,
        outbound: mpsc::Sender<Frame>,
    },
    Unregister {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },
    Broadcast(Frame),
    SendToUser {
        user_id: UserId,
        frame: Frame,
    },
    SendToSession {
        session_id: SessionId,
        frame: Frame,
    },
    Heartbeat(SessionId),
    ConnectedUsers(oneshot::Sender<Vec<UserId>>),
    SessionCount(oneshot::Sender<usize>),
}

struct SessionEntry {
    user: User,
    outbound: mpsc::Sender<Frame>,
    last_heartbeat: Instant,
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocate a fresh session id.
    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_closed| HubError::Closed)
    }

    /// Register a session. A later registration for the same user replaces
    /// the user mapping; both sessions keep receiving broadcasts.
    pub async fn register(
        &self,
        session_id: SessionId,
        user: User,
        outbound: mpsc::Sender<Frame>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Register {
            session_id,
            user,
            outbound,
        })
        .await
    }

    /// Remove a session and run its teardown. Returns `false` when the
    /// session was already gone.
    pub async fn unregister(&self, session_id: SessionId) -> Result<bool, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Unregister {
            session_id,
            respond_to,
        })
        .await?;
        response.await.map_err(|_dropped| HubError::Closed)
    }

    /// Serialize `event` and deliver it to every registered session.
    pub async fn broadcast(&self, event: &ServerEvent) -> Result<(), HubError> {
        self.broadcast_frame(Frame::from(event.to_json()?)).await
    }

    /// Deliver an already-serialized frame to every registered session.
    pub async fn broadcast_frame(&self, frame: Frame) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast(frame)).await
    }

    /// Best-effort delivery to the user's current session on this process.
    pub async fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> Result<(), HubError> {
        let frame = Frame::from(event.to_json()?);
        self.send(HubCommand::SendToUser { user_id, frame }).await
    }

    /// Deliver to one session.
    pub async fn send_to_session(
        &self,
        session_id: SessionId,
        event: &ServerEvent,
    ) -> Result<(), HubError> {
        let frame = Frame::from(event.to_json()?);
        self.send(HubCommand::SendToSession { session_id, frame }).await
    }

    /// Record a heartbeat for the session.
    pub async fn heartbeat(&self, session_id: SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Heartbeat(session_id)).await
    }

    /// Users with at least one session on this process.
    pub async fn connected_users(&self) -> Result<Vec<UserId>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::ConnectedUsers(respond_to)).await?;
        response.await.map_err(|_dropped| HubError::Closed)
    }

    /// Registered sessions on this process.
    pub async fn session_count(&self) -> Result<usize, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::SessionCount(respond_to)).await?;
        response.await.map_err(|_dropped| HubError::Closed)
    }
}

/// The hub task state. Build with [`Hub::new`] and drive with [`Hub::run`].
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    sessions: HashMap<SessionId, SessionEntry>,
    users: HashMap<UserId, SessionId>,
    presence: Presence,
    teardowns: JoinSet<()>,
    heartbeat_timeout: Duration,
    sweep_interval: Duration,
}

impl Hub {
    /// Create the hub and its handle.
    pub fn new(config: &RealtimeConfig, presence: Presence) -> (Self, HubHandle) {
        let capacity = usize::try_from(config.hub_mailbox_capacity).unwrap_or(1).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            commands: rx,
            sessions: HashMap::new(),
            users: HashMap::new(),
            presence,
            teardowns: JoinSet::new(),
            heartbeat_timeout: config.heartbeat_timeout(),
            sweep_interval: config.sweep_interval(),
        };
        let handle = HubHandle {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Process commands and sweeps until `shutdown` fires or every handle
    /// is dropped, then evict all remaining sessions and wait for their
    /// teardown to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.reset();

        info!(
            heartbeat_timeout_secs = self.heartbeat_timeout.as_secs(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Hub started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = sweep.tick() => self.sweep(Instant::now()),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(_) = self.teardowns.join_next(), if !self.teardowns.is_empty() => {}
            }
        }

        let remaining: Vec<SessionId> = self.sessions.keys().copied().collect();
        info!(sessions = remaining.len(), "Hub shutting down");
        for session_id in remaining {
            self.evict(session_id, "shutdown");
        }
        while self.teardowns.join_next().await.is_some() {}
        info!("Hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                session_id,
                user,
                outbound,
            } => {
                info!(session_id = %session_id, user_id = %user.id, "Session registered");
                self.users.insert(user.id, session_id);
                self.sessions.insert(
                    session_id,
                    SessionEntry {
                        user,
                        outbound,
                        last_heartbeat: Instant::now(),
                    },
                );
            }
            HubCommand::Unregister {
                session_id,
                respond_to,
            } => {
                let removed = self.evict(session_id, "unregister");
                let _ = respond_to.send(removed);
            }
            HubCommand::Broadcast(frame) => self.fan_out(&frame),
            HubCommand::SendToUser { user_id, frame } => {
                let Some(session_id) = self.users.get(&user_id).copied() else {
                    debug!(user_id = %user_id, "Targeted send dropped: user not connected here");
                    return;
                };
                self.deliver(session_id, frame);
            }
            HubCommand::SendToSession { session_id, frame } => self.deliver(session_id, frame),
            HubCommand::Heartbeat(session_id) => {
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    entry.last_heartbeat = Instant::now();
                }
            }
            HubCommand::ConnectedUsers(respond_to) => {
                let users = self.sessions.values().map(|entry| entry.user.id).collect();
                let _ = respond_to.send(users);
            }
            HubCommand::SessionCount(respond_to) => {
                let _ = respond_to.send(self.sessions.len());
            }
        }
    }

    /// Offer `frame` to every session, then evict the ones that could not
    /// take it.
    fn fan_out(&mut self, frame: &Frame) {
        let mut failed = Vec::new();
        for (session_id, entry) in &self.sessions {
            if let Err(e) = entry.outbound.try_send(frame.clone()) {
                failed.push((*session_id, failure_reason(&e)));
            }
        }
        debug!(
            sessions = self.sessions.len(),
            failed = failed.len(),
            "Broadcast delivered"
        );
        for (session_id, reason) in failed {
            self.evict(session_id, reason);
        }
    }

    fn deliver(&mut self, session_id: SessionId, frame: Frame) {
        let Some(entry) = self.sessions.get(&session_id) else {
            debug!(session_id = %session_id, "Targeted send dropped: session gone");
            return;
        };
        if let Err(e) = entry.outbound.try_send(frame) {
            let reason = failure_reason(&e);
            self.evict(session_id, reason);
        }
    }

    /// Evict sessions whose last heartbeat is older than the timeout.
    fn sweep(&mut self, now: Instant) {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_heartbeat) > self.heartbeat_timeout)
            .map(|(session_id, _)| *session_id)
            .collect();
        if !stale.is_empty() {
            info!(stale = stale.len(), "Liveness sweep evicting sessions");
        }
        for session_id in stale {
            self.evict(session_id, "heartbeat timeout");
        }
    }

    /// Remove the session from both maps and schedule its teardown. Dropping
    /// the entry drops the hub's sender, which closes the session's outbound
    /// queue and ends its write loop.
    fn evict(&mut self, session_id: SessionId, reason: &'static str) -> bool {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return false;
        };
        if self.users.get(&entry.user.id) == Some(&session_id) {
            self.users.remove(&entry.user.id);
        }
        info!(
            session_id = %session_id,
            user_id = %entry.user.id,
            reason,
            "Session evicted"
        );

        let presence = self.presence.clone();
        let user = entry.user;
        self.teardowns.spawn(async move {
            if let Err(e) = presence.leave(user.id, &user.username).await {
                warn!(user_id = %user.id, error = %e, "Presence teardown failed");
            }
        });
        true
    }
}

const fn failure_reason(error: &TrySendError<Frame>) -> &'static str {
    match error {
        TrySendError::Full(_) => "outbound queue full",
        TrySendError::Closed(_) => "outbound queue closed",
    }
}
