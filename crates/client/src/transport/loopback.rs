// In-process transport. Each connect hands a `ServerEnd` to whoever holds
// the accept receiver, which then plays the server by hand.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coedit_common::protocol::ws::{AckBody, Frame};
use tokio::sync::mpsc;

use super::{Connector, Link, LinkEvent, TransportError};

/// Server side of one loopback link.
#[derive(Debug)]
pub struct ServerEnd {
    pub document_id: String,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
    pub outbound: mpsc::UnboundedSender<LinkEvent>,
}

impl ServerEnd {
    /// Next frame sent by the client, or `None` once the client dropped the link.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(LinkEvent::Frame(frame)).is_ok()
    }

    pub fn ack(&self, id: u64, body: AckBody) -> bool {
        self.send(Frame::Ack { id, body })
    }

    pub fn close(&self, reason: &str) {
        let _ = self.outbound.send(LinkEvent::Closed(reason.to_string()));
    }
}

#[derive(Debug)]
struct LoopbackInner {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    inner: Arc<LoopbackInner>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, accept_rx) = mpsc::unbounded_channel();
        let inner = LoopbackInner {
            accepted,
            refuse_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        };
        (Self { inner: Arc::new(inner) }, accept_rx)
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.inner.refuse_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of connect calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn open(&self, document_id: &str) -> Result<Link, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .inner
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("loopback refused".to_string()));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let end = ServerEnd { document_id: document_id.to_string(), inbound: server_rx, outbound: server_tx };
        self.inner
            .accepted
            .send(end)
            .map_err(|_| TransportError::Connect("loopback listener gone".to_string()))?;

        Ok(Link { outbound: client_tx, inbound: client_rx })
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, document_id: &str) -> impl Future<Output = Result<Link, TransportError>> + Send {
        std::future::ready(self.open(document_id))
    }
}
