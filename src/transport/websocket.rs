//! WebSocket connector (tokio-tungstenite).
//!
//! Each frame is one binary WebSocket message. Tungstenite reassembles
//! continuation frames itself, so every message surfaces as a single
//! `end_of_message` chunk. Text messages are accepted as their UTF-8 bytes;
//! ping/pong is answered by the library.

use std::future::Future;
use std::pin::Pin;

use futures::{future, SinkExt, StreamExt};
use http::Uri;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use super::{Connector, Link, TransportEvent};
use crate::config::ClientConfig;
use crate::error::{ChatLinkError, Result};

/// Connects to one fixed `ws://` or `wss://` endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    uri: Uri,
}

impl WebSocketConnector {
    /// Create a connector for a validated endpoint
    pub fn new(uri: Uri) -> Self {
        Self { uri }
    }

    /// Create a connector from client configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(config.endpoint_uri()?))
    }

    fn translate(message: tungstenite::Result<Message>) -> Option<Result<TransportEvent>> {
        match message {
            Ok(Message::Binary(data)) => Some(Ok(TransportEvent::Chunk {
                data: data.to_vec(),
                end_of_message: true,
            })),
            Ok(Message::Text(text)) => Some(Ok(TransportEvent::Chunk {
                data: text.as_str().as_bytes().to_vec(),
                end_of_message: true,
            })),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "no close frame".to_string());
                Some(Ok(TransportEvent::Closed { reason }))
            },
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
            Err(e) => Some(Err(ChatLinkError::from(e))),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>> {
        Box::pin(async move {
            let (ws_stream, response) = connect_async(self.uri.to_string()).await?;
            tracing::debug!(
                endpoint = %self.uri,
                status = %response.status(),
                "WebSocket handshake complete"
            );

            let (sink, stream) = ws_stream.split();
            let sink = sink
                .with(|bytes: Vec<u8>| future::ready(Ok::<_, tungstenite::Error>(Message::binary(bytes))))
                .sink_map_err(ChatLinkError::from);
            let stream = stream.filter_map(|message| future::ready(Self::translate(message)));

            Ok(Link::new(sink, stream))
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn endpoint(&self) -> String {
        self.uri.to_string()
    }
}
