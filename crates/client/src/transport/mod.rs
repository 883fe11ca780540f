// Transport abstraction beneath a document channel.
//
// A `Connector` opens one duplex `Link` per document. The channel driver
// owns the link and never touches sockets directly, so tests and in-process
// embedders can swap the WebSocket transport for the loopback one.

pub mod loopback;
pub mod ws;

use std::future::Future;

use coedit_common::protocol::ws::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ConfigError;

pub use loopback::{LoopbackConnector, ServerEnd};
pub use ws::WsConnector;

/// Something the transport delivered to the channel driver.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Frame(Frame),
    /// The peer or the network closed the link.
    Closed(String),
}

/// One established connection. Dropping `outbound` closes the link.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Opens links to the collaboration server.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, document_id: &str) -> impl Future<Output = Result<Link, TransportError>> + Send;
}
