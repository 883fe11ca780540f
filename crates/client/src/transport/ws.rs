// WebSocket transport over tokio-tungstenite.

use std::future::Future;
use std::sync::Arc;

use coedit_common::protocol::ws::{decode_frame, encode_frame, Frame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::{Connector, Link, LinkEvent, TransportError};
use crate::config::ClientConfig;

/// Connects to `{server_url}/v1/ws/{documentId}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: Arc<ClientConfig>,
}

impl WsConnector {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

impl Connector for WsConnector {
    fn connect(&self, document_id: &str) -> impl Future<Output = Result<Link, TransportError>> + Send {
        let url = self.config.channel_url(document_id);
        let document_id = document_id.to_string();

        async move {
            let url = url?;
            let (socket, _) = connect_async(url.as_str())
                .await
                .map_err(|error| TransportError::Connect(error.to_string()))?;
            debug!(document_id = %document_id, url = %url, "websocket connected");

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(socket, outbound_rx, inbound_tx, document_id));

            Ok(Link { outbound: outbound_tx, inbound: inbound_rx })
        }
    }
}

async fn pump(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
    document_id: String,
) {
    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                };
                let text = match encode_frame(&frame) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(document_id = %document_id, error = %error, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(error) = sink.send(WsMessage::Text(text.into())).await {
                    break format!("send failed: {error}");
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str()) {
                        Ok(frame) => {
                            if inbound.send(LinkEvent::Frame(frame)).is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            warn!(document_id = %document_id, error = %error, "ignoring malformed server frame");
                        }
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if let Err(error) = sink.send(WsMessage::Pong(payload)).await {
                            break format!("pong failed: {error}");
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame
                            .map(|frame| format!("server closed: {}", frame.reason.as_str()))
                            .unwrap_or_else(|| "server closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => break format!("receive failed: {error}"),
                    None => break "connection closed".to_string(),
                }
            }
        }
    };

    debug!(document_id = %document_id, reason = %reason, "websocket link ended");
    let _ = inbound.send(LinkEvent::Closed(reason));
}
