// Reference-counted registry of document channels.
//
// Every local consumer of a document shares one channel. Releasing the
// last reference schedules teardown after a grace delay so that rapid
// release/acquire churn (a view remounting) reuses the live channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use super::{Channel, ChannelEvent};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::transport::Connector;

struct ManagedChannel {
    channel: Channel,
    refs: usize,
    teardown: Option<JoinHandle<()>>,
}

pub struct ChannelMultiplexer<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    ack_timeout: Duration,
    grace: Duration,
    channels: Arc<Mutex<HashMap<String, ManagedChannel>>>,
}

impl<C: Connector> ChannelMultiplexer<C> {
    pub fn new(connector: Arc<C>, policy: ReconnectPolicy, ack_timeout: Duration, grace: Duration) -> Self {
        Self { connector, policy, ack_timeout, grace, channels: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn from_config(connector: Arc<C>, config: &ClientConfig) -> Self {
        Self::new(connector, config.reconnect, config.ack_timeout(), config.teardown_grace())
    }

    /// Shared channel for `document_id`, created on first use. Cancels a
    /// pending teardown.
    pub async fn acquire(&self, document_id: &str) -> Channel {
        let mut channels = self.channels.lock().await;

        if let Some(entry) = channels.get_mut(document_id) {
            entry.refs = entry.refs.saturating_add(1);
            if let Some(teardown) = entry.teardown.take() {
                teardown.abort();
                debug!(document_id = %document_id, "teardown cancelled by re-acquire");
            }
            return entry.channel.clone();
        }

        let channel = Channel::open(Arc::clone(&self.connector), document_id, self.policy, self.ack_timeout);
        spawn_diagnostics(&channel);
        channels.insert(
            document_id.to_string(),
            ManagedChannel { channel: channel.clone(), refs: 1, teardown: None },
        );
        debug!(document_id = %document_id, "channel created");
        channel
    }

    /// Drop one reference. The last release schedules teardown after the
    /// grace delay instead of closing immediately.
    pub async fn release(&self, document_id: &str) {
        let mut channels = self.channels.lock().await;
        let Some(entry) = channels.get_mut(document_id) else {
            warn!(document_id = %document_id, "release of unknown channel");
            return;
        };
        if entry.refs == 0 {
            warn!(document_id = %document_id, "release of unreferenced channel");
            return;
        }

        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }

        let registry = Arc::clone(&self.channels);
        let grace = self.grace;
        let id = document_id.to_string();
        entry.teardown = Some(tokio::spawn(async move {
            time::sleep(grace).await;
            let mut channels = registry.lock().await;
            if channels.get(&id).is_some_and(|entry| entry.refs == 0) {
                if let Some(entry) = channels.remove(&id) {
                    entry.channel.close();
                    debug!(document_id = %id, "channel torn down");
                }
            }
        }));
    }

    pub async fn ref_count(&self, document_id: &str) -> usize {
        self.channels.lock().await.get(document_id).map_or(0, |entry| entry.refs)
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        self.channels.lock().await.contains_key(document_id)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Close every channel immediately, ignoring reference counts.
    pub async fn shutdown(&self) {
        let mut channels = self.channels.lock().await;
        for (document_id, entry) in channels.drain() {
            if let Some(teardown) = entry.teardown {
                teardown.abort();
            }
            entry.channel.close();
            debug!(document_id = %document_id, "channel closed on shutdown");
        }
    }
}

/// Log connection transitions for one channel until it closes.
fn spawn_diagnostics(channel: &Channel) {
    let mut events = channel.subscribe();
    let document_id = channel.document_id().to_string();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Connected) => debug!(document_id = %document_id, "diagnostics: connected"),
                Ok(ChannelEvent::Disconnected { reason }) => {
                    debug!(document_id = %document_id, reason = %reason, "diagnostics: disconnected");
                }
                Ok(ChannelEvent::Closed) => break,
                Ok(ChannelEvent::Message { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
