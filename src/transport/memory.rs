//! In-process scripted connector.
//!
//! Each call to `connect` consumes the next scripted attempt: either a
//! failure or a link whose far end is a [`MemoryPeer`] held by the caller.
//! Useful for tests and for embedding the client next to an in-process
//! server.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};

use super::{Connector, Link, TransportEvent};
use crate::error::{ChatLinkError, Result};

enum Attempt {
    Fail(String),
    Accept(Link),
}

/// Connector that replays scripted outcomes
#[derive(Default)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Attempt>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Create a connector with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a failed attempt
    pub fn fail(&self, reason: impl Into<String>) {
        self.push(Attempt::Fail(reason.into()));
    }

    /// Script a successful attempt and return the server side of its link
    pub fn accept(&self) -> MemoryPeer {
        let (to_server, from_client) = mpsc::unbounded::<Vec<u8>>();
        let (to_client, from_server) = mpsc::unbounded::<Result<TransportEvent>>();

        let sink = to_server.sink_map_err(|e| ChatLinkError::Transport(e.to_string()));
        self.push(Attempt::Accept(Link::new(sink, from_server)));

        MemoryPeer {
            to_client,
            from_client,
        }
    }

    /// Script a successful attempt over a caller-built link
    pub fn accept_link(&self, link: Link) {
        self.push(Attempt::Accept(link));
    }

    /// Connect attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn push(&self, attempt: Attempt) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(attempt);
    }

    fn next_attempt(&self) -> Option<Attempt> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>> {
        Box::pin(async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.next_attempt() {
                Some(Attempt::Accept(link)) => Ok(link),
                Some(Attempt::Fail(reason)) => Err(ChatLinkError::Transport(reason)),
                None => Err(ChatLinkError::Transport(format!(
                    "no scripted connection for attempt {attempt}"
                ))),
            }
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

/// Server side of an in-memory link.
///
/// Dropping the peer ends the client's stream, like a dropped socket.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<TransportEvent>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Deliver one chunk; returns false once the client side is gone
    pub fn send_chunk(&self, data: impl Into<Vec<u8>>, end_of_message: bool) -> bool {
        self.to_client
            .unbounded_send(Ok(TransportEvent::Chunk {
                data: data.into(),
                end_of_message,
            }))
            .is_ok()
    }

    /// Deliver one complete frame
    pub fn send_frame(&self, data: impl Into<Vec<u8>>) -> bool {
        self.send_chunk(data, true)
    }

    /// Close from the server side
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(TransportEvent::Closed {
            reason: reason.into(),
        }));
        self.to_client.close_channel();
    }

    /// Inject a transport error
    pub fn fail(&self, error: ChatLinkError) {
        let _ = self.to_client.unbounded_send(Err(error));
    }

    /// Next frame written by the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.next().await
    }
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer").finish_non_exhaustive()
    }
}
