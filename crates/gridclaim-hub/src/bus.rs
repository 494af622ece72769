//! Cross-instance event bus.
//!
//! Every accepted event is published once on the bus; every process
//! (including the publisher) forwards what it receives to its own hub.
//! Envelopes pass through unmodified and unvalidated. There is no
//! persistence or replay: frames published while a subscription is down
//! are lost, and new sessions recover through their `INIT_BOARD` snapshot.
//!
//! [`EventBus::Nats`] spans processes; [`EventBus::Local`] is an in-process
//! broadcast channel for the `in_memory` backend and for running several
//! hubs against one bus in tests.

use std::time::Duration;

use futures::StreamExt as _;
use gridclaim_types::ServerEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::hub::{Frame, HubHandle};

/// Upper bound on a single publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// First resubscribe delay after a lost NATS subscription.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Longest resubscribe delay.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Frames buffered per local subscriber before it starts lagging.
pub const LOCAL_BUS_CAPACITY: usize = 1024;

/// Fan-out medium shared by every process serving the board.
#[derive(Clone)]
pub enum EventBus {
    /// NATS core pub/sub on one subject.
    Nats(NatsBus),
    /// In-process broadcast channel.
    Local(LocalBus),
}

impl EventBus {
    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nats(_) => "nats",
            Self::Local(_) => "local",
        }
    }

    /// Serialize `event` and publish it to every subscribed process.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the event cannot be encoded
    /// and [`BusError::Nats`] or [`BusError::Timeout`] on transport failure.
    pub async fn publish(&self, event: &ServerEvent) -> Result<(), BusError> {
        let json = event.to_json()?;
        debug!(bus = self.name(), event_type = event.event_type(), "Publishing event");
        match self {
            Self::Nats(bus) => bus.publish(json.into_bytes()).await,
            Self::Local(bus) => {
                bus.publish(Frame::from(json));
                Ok(())
            }
        }
    }

    /// Open a subscription. Frames published after this returns are
    /// delivered to the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Nats`] if the initial NATS subscription fails.
    pub async fn subscribe(&self) -> Result<Subscription, BusError> {
        match self {
            Self::Nats(bus) => Ok(Subscription::Nats {
                subscriber: bus.subscribe().await?,
                bus: bus.clone(),
            }),
            Self::Local(bus) => Ok(Subscription::Local(bus.sender.subscribe())),
        }
    }
}

// ---------------------------------------------------------------------------
// NATS
// ---------------------------------------------------------------------------

/// NATS client bound to the board event subject.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    subject: String,
}

impl NatsBus {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Nats`] if the connection cannot be established.
    pub async fn connect(url: &str, subject: &str) -> Result<Self, BusError> {
        info!(url, subject, "Connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Nats(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self {
            client,
            subject: subject.to_owned(),
        })
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), BusError> {
        let publish = self.client.publish(self.subject.clone(), payload.into());
        tokio::time::timeout(PUBLISH_TIMEOUT, publish)
            .await
            .map_err(|_elapsed| BusError::Timeout(PUBLISH_TIMEOUT))?
            .map_err(|e| BusError::Nats(format!("failed to publish to {}: {e}", self.subject)))
    }

    async fn subscribe(&self) -> Result<async_nats::Subscriber, BusError> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| BusError::Nats(format!("failed to subscribe to {}: {e}", self.subject)))?;
        info!(subject = %self.subject, "Subscribed to board events");
        Ok(subscriber)
    }
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// In-process bus. Clones share one channel.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Frame>,
}

impl LocalBus {
    /// A bus buffering `capacity` frames per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    fn publish(&self, frame: Frame) {
        if self.sender.send(frame).is_err() {
            debug!("Local bus has no subscribers; frame dropped");
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(LOCAL_BUS_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// An open subscription, forwarded into a hub by [`Subscription::run`].
pub enum Subscription {
    /// NATS subscriber plus the client used to resubscribe.
    Nats {
        /// Live subscriber.
        subscriber: async_nats::Subscriber,
        /// Bus used to resubscribe after the stream ends.
        bus: NatsBus,
    },
    /// Local broadcast receiver.
    Local(broadcast::Receiver<Frame>),
}

impl Subscription {
    /// Forward every received frame to `hub` until `shutdown` fires or the
    /// hub stops. A lost NATS subscription is re-established with backoff;
    /// the hub is never torn down because of the bus.
    pub async fn run(self, hub: HubHandle, shutdown: CancellationToken) {
        match self {
            Self::Nats { subscriber, bus } => run_nats(subscriber, &bus, &hub, &shutdown).await,
            Self::Local(receiver) => run_local(receiver, &hub, &shutdown).await,
        }
        info!("Bus subscription stopped");
    }
}

async fn run_nats(
    mut subscriber: async_nats::Subscriber,
    bus: &NatsBus,
    hub: &HubHandle,
    shutdown: &CancellationToken,
) {
    loop {
        loop {
            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                message = subscriber.next() => message,
            };
            let Some(message) = message else {
                warn!("NATS subscription ended; resubscribing");
                break;
            };
            let frame = match String::from_utf8(message.payload.to_vec()) {
                Ok(text) => Frame::from(text),
                Err(e) => {
                    warn!(error = %e, "Dropping non-UTF-8 bus payload");
                    continue;
                }
            };
            if hub.broadcast_frame(frame).await.is_err() {
                return;
            }
        }

        let mut backoff = INITIAL_BACKOFF;
        subscriber = loop {
            match bus.subscribe().await {
                Ok(subscriber) => break subscriber,
                Err(e) => {
                    error!(error = %e, retry_in_ms = backoff.as_millis(), "NATS resubscribe failed");
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                }
            }
        };
    }
}

async fn run_local(
    mut receiver: broadcast::Receiver<Frame>,
    hub: &HubHandle,
    shutdown: &CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            received = receiver.recv() => received,
        };
        match received {
            Ok(frame) => {
                if hub.broadcast_frame(frame).await.is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Local bus subscriber lagged, skipping ahead");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
