//! Transport layer for chatlink.
//!
//! Provides the connection manager and pluggable connectors:
//! - **WebSocket**: one persistent `ws://`/`wss://` connection (tokio-tungstenite)
//! - **Memory**: scripted in-process links for tests and embedding
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ConnectionManager              │
//! │  reconnect loop · receive loop · sends   │
//! └──────────────────┬──────────────────────┘
//!                    │ Connector::connect() → Link { sink, stream }
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │ WebSocket       │ │ Memory          │
//! │ Connector       │ │ Connector       │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! A [`Link`] carries whole outbound frames on its sink and reports inbound
//! data as [`TransportEvent`] chunks; a frame is complete when a chunk
//! carries `end_of_message`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatlink::transport::{ConnectionManager, WebSocketConnector};
//!
//! let connector = WebSocketConnector::from_config(&config.client)?;
//! let manager = ConnectionManager::new(&config, Arc::new(connector), dispatcher)?;
//! manager.connect().await?;
//! ```

mod assembler;
mod connection;
mod memory;
mod state;
mod websocket;

pub use assembler::FrameAssembler;
pub use connection::{ConnectionManager, SendOutcome};
pub use memory::{MemoryConnector, MemoryPeer};
pub use state::{ConnectionEvent, ConnectionState};
pub use websocket::WebSocketConnector;

use std::future::Future;
use std::pin::Pin;

use futures::{Sink, Stream};

use crate::error::{ChatLinkError, Result};

/// Outbound half of a link: one item is one transport message
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = ChatLinkError> + Send>>;

/// Inbound half of a link
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TransportEvent>> + Send>>;

/// Inbound transport activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Part (or all) of a frame
    Chunk {
        /// Chunk bytes
        data: Vec<u8>,
        /// This chunk completes the frame
        end_of_message: bool,
    },
    /// The peer closed the connection
    Closed {
        /// Close reason reported by the peer
        reason: String,
    },
}

/// An established connection
pub struct Link {
    /// Outbound frames
    pub sink: FrameSink,
    /// Inbound events
    pub stream: EventStream,
}

impl Link {
    /// Box a sink and stream into a link
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Vec<u8>, Error = ChatLinkError> + Send + 'static,
        St: Stream<Item = Result<TransportEvent>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Connector trait for pluggable transports.
///
/// Implementations establish one link per call; the connection manager
/// owns retrying.
pub trait Connector: Send + Sync {
    /// Establish a new link.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;

    /// Get the endpoint as a string.
    fn endpoint(&self) -> String;
}
