// Per-document duplex channel.
//
// A `Channel` is a cheap handle onto one driver task. The driver owns the
// transport link, reconnects with exponential backoff, correlates acks to
// requests by id, and fans broadcast events out to every subscriber.

pub mod multiplexer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coedit_common::protocol::ws::{AckBody, AckOutcome, EventName, Frame};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::ChannelError;
use crate::transport::{Connector, Link, LinkEvent};

pub use multiplexer::ChannelMultiplexer;

const EVENT_BUFFER_SIZE: usize = 256;

/// Lifecycle and broadcast notifications delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Message { event: EventName, payload: Value },
    /// The channel was torn down; no further events follow.
    Closed,
}

#[derive(Debug)]
enum Command {
    Request { id: u64, event: EventName, payload: Value, reply: oneshot::Sender<AckBody> },
    Notify { event: EventName, payload: Value },
    Reconnect,
    Close,
}

#[derive(Debug)]
struct ChannelInner {
    document_id: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ChannelEvent>,
    connected: watch::Receiver<bool>,
    next_request_id: AtomicU64,
    ack_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Spawn the driver for `document_id` and return a handle to it.
    pub fn open<C: Connector>(
        connector: Arc<C>,
        document_id: &str,
        policy: ReconnectPolicy,
        ack_timeout: Duration,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (connected_tx, connected_rx) = watch::channel(false);

        let driver = Driver {
            connector,
            document_id: document_id.to_string(),
            policy,
            commands: commands_rx,
            events: events_tx.clone(),
            connected: connected_tx,
        };
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(ChannelInner {
                document_id: document_id.to_string(),
                commands: commands_tx,
                events: events_tx,
                connected: connected_rx,
                next_request_id: AtomicU64::new(1),
                ack_timeout,
            }),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.inner.document_id
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Wait until the transport is up. Fails once the channel is closed.
    pub async fn wait_connected(&self) -> Result<(), ChannelError> {
        let mut connected = self.inner.connected.clone();
        connected.wait_for(|up| *up).await.map(|_| ()).map_err(|_| ChannelError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Whether two handles refer to the same underlying channel.
    pub fn same_channel(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Send a request and wait for its acknowledgement.
    ///
    /// Fails fast with [`ChannelError::NotConnected`] while the link is down.
    /// An ack that does not arrive within the ack timeout, or a link that
    /// drops first, settles as [`AckOutcome::Missing`].
    pub async fn request<T, R>(&self, event: EventName, payload: &T) -> Result<AckOutcome<R>, ChannelError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let payload = serde_json::to_value(payload)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Request { id, event, payload, reply: reply_tx })
            .map_err(|_| ChannelError::Closed)?;

        match time::timeout(self.inner.ack_timeout, reply_rx).await {
            Ok(Ok(body)) => Ok(body.into_outcome()?),
            Ok(Err(_)) => {
                debug!(document_id = %self.inner.document_id, event = %event, id, "link dropped before ack");
                Ok(AckOutcome::Missing)
            }
            Err(_) => {
                debug!(document_id = %self.inner.document_id, event = %event, id, "ack timed out");
                Ok(AckOutcome::Missing)
            }
        }
    }

    /// Fire-and-forget notification.
    pub fn notify<T: Serialize>(&self, event: EventName, payload: &T) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let payload = serde_json::to_value(payload)?;
        self.inner.commands.send(Command::Notify { event, payload }).map_err(|_| ChannelError::Closed)
    }

    /// Drop the current link (if any) and start connecting again with a
    /// fresh attempt budget.
    pub fn reconnect(&self) {
        let _ = self.inner.commands.send(Command::Reconnect);
    }

    /// Stop the driver. Pending requests settle as missing and subscribers
    /// receive [`ChannelEvent::Closed`].
    pub fn close(&self) {
        let _ = self.inner.commands.send(Command::Close);
    }
}

// ── Driver ──────────────────────────────────────────────────────────

struct Driver<C> {
    connector: Arc<C>,
    document_id: String,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ChannelEvent>,
    connected: watch::Sender<bool>,
}

enum LinkEnd {
    Dropped(String),
    Closed,
}

enum Wake {
    Retry,
    Close,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        let mut failures = 0u32;

        'outer: loop {
            let Some(result) = self.connect_once().await else {
                break;
            };

            let link = match result {
                Ok(link) => link,
                Err(error) => {
                    failures += 1;
                    warn!(document_id = %self.document_id, attempt = failures, error = %error, "channel connect failed");

                    if self.policy.max_attempts != 0 && failures >= self.policy.max_attempts {
                        warn!(document_id = %self.document_id, "reconnect budget exhausted; waiting for explicit reconnect");
                        match self.idle().await {
                            Wake::Retry => {
                                failures = 0;
                                continue 'outer;
                            }
                            Wake::Close => break,
                        }
                    }

                    match self.backoff(self.policy.delay_for(failures)).await {
                        Wake::Retry => continue 'outer,
                        Wake::Close => break,
                    }
                }
            };

            failures = 0;
            self.connected.send_replace(true);
            let _ = self.events.send(ChannelEvent::Connected);
            info!(document_id = %self.document_id, "channel connected");

            match self.serve(link).await {
                LinkEnd::Dropped(reason) => {
                    self.connected.send_replace(false);
                    warn!(document_id = %self.document_id, reason = %reason, "channel disconnected");
                    let _ = self.events.send(ChannelEvent::Disconnected { reason });
                }
                LinkEnd::Closed => {
                    self.connected.send_replace(false);
                    let _ = self.events.send(ChannelEvent::Disconnected { reason: "channel closed".to_string() });
                    break;
                }
            }
        }

        self.connected.send_replace(false);
        let _ = self.events.send(ChannelEvent::Closed);
        debug!(document_id = %self.document_id, "channel driver stopped");
    }

    /// One connect attempt. `None` means the channel was closed meanwhile.
    async fn connect_once(&mut self) -> Option<Result<Link, crate::transport::TransportError>> {
        let connect = self.connector.connect(&self.document_id);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => return None,
                    Some(command) => discard(command),
                },
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Wake {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Wake::Retry,
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => return Wake::Close,
                    Some(Command::Reconnect) => return Wake::Retry,
                    Some(command) => discard(command),
                },
            }
        }
    }

    async fn idle(&mut self) -> Wake {
        loop {
            match self.commands.recv().await {
                None | Some(Command::Close) => return Wake::Close,
                Some(Command::Reconnect) => return Wake::Retry,
                Some(command) => discard(command),
            }
        }
    }

    async fn serve(&mut self, link: Link) -> LinkEnd {
        let Link { outbound, mut inbound } = link;
        let mut pending: HashMap<u64, oneshot::Sender<AckBody>> = HashMap::new();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => return LinkEnd::Closed,
                    Some(Command::Reconnect) => return LinkEnd::Dropped("reconnect requested".to_string()),
                    Some(Command::Request { id, event, payload, reply }) => {
                        pending.retain(|_, waiting| !waiting.is_closed());
                        if outbound.send(Frame::Request { id, event, payload }).is_err() {
                            return LinkEnd::Dropped("transport closed".to_string());
                        }
                        pending.insert(id, reply);
                    }
                    Some(Command::Notify { event, payload }) => {
                        if outbound.send(Frame::Notify { event, payload }).is_err() {
                            return LinkEnd::Dropped("transport closed".to_string());
                        }
                    }
                },
                incoming = inbound.recv() => match incoming {
                    Some(LinkEvent::Frame(Frame::Ack { id, body })) => match pending.remove(&id) {
                        Some(reply) => {
                            let _ = reply.send(body);
                        }
                        None => debug!(document_id = %self.document_id, id, "ack for unknown or expired request"),
                    },
                    Some(LinkEvent::Frame(Frame::Event { event, payload })) => {
                        let _ = self.events.send(ChannelEvent::Message { event, payload });
                    }
                    Some(LinkEvent::Frame(Frame::Error { code, message })) => {
                        warn!(document_id = %self.document_id, code = %code, message = %message, "server reported frame error");
                    }
                    Some(LinkEvent::Frame(other)) => {
                        debug!(document_id = %self.document_id, frame = ?other, "ignoring unexpected frame");
                    }
                    Some(LinkEvent::Closed(reason)) => return LinkEnd::Dropped(reason),
                    None => return LinkEnd::Dropped("transport closed".to_string()),
                },
            }
        }
    }
}

/// Commands that arrive while no link is up. Dropping a request's reply
/// sender settles it as missing.
fn discard(command: Command) {
    if let Command::Request { id, event, .. } = command {
        debug!(id, event = %event, "request issued while disconnected");
    }
}
