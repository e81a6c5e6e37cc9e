//! Opcode routing for decoded inbound messages.
//!
//! Handlers are registered once, before the connection starts, and looked up
//! by [`OpCode`]. At most one handler runs per frame.
//!
//! | Registration      | Execution                                        |
//! |-------------------|--------------------------------------------------|
//! | `on`              | spawned onto the runtime, not awaited            |
//! | `on_critical`     | awaited before the next frame is read            |
//! | `forward`         | envelope posted to the caller's channel, in order |
//!
//! Handlers for `ReceiveRSA` and `ServerReadyToReceive` are always awaited,
//! whichever way they were registered.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatlink::dispatch::MessageDispatcher;
//! use chatlink::protocol::OpCode;
//!
//! let (tx, mut logins) = tokio::sync::mpsc::unbounded_channel();
//! let dispatcher = MessageDispatcher::new()
//!     .forward(OpCode::AnswerLogin, tx)
//!     .on(OpCode::UpdateRelationship, |env| async move {
//!         tracing::info!(fields = ?env.fields().keys().collect::<Vec<_>>(), "relationship");
//!     });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{Envelope, Inbound, OpCode};

/// Boxed handler future
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type HandlerFn = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// How a handler is run relative to the receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Detached,
    Inline,
}

#[derive(Clone)]
struct Handler {
    mode: Mode,
    call: HandlerFn,
}

/// Result of dispatching one frame
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A handler was invoked (or spawned)
    Handled(OpCode),
    /// The tag is not a known opcode
    Unrecognized(serde_json::Value),
    /// Known opcode with no registered handler
    Unhandled(OpCode),
}

/// Opcode to handler table
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    handlers: HashMap<OpCode, Handler>,
}

impl MessageDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fire-and-forget handler. Replaces any earlier handler.
    pub fn on<F, Fut>(self, op_code: OpCode, handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(op_code, Mode::Detached, handler)
    }

    /// Register a handler that completes before the next frame is read.
    pub fn on_critical<F, Fut>(self, op_code: OpCode, handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(op_code, Mode::Inline, handler)
    }

    /// Post envelopes for `op_code` to a channel owned by the caller.
    pub fn forward(self, op_code: OpCode, sender: mpsc::UnboundedSender<Envelope>) -> Self {
        self.register(op_code, Mode::Inline, move |envelope: Envelope| {
            if sender.send(envelope).is_err() {
                tracing::debug!(%op_code, "Forward receiver dropped");
            }
            std::future::ready(())
        })
    }

    /// Check if a handler is registered for `op_code`
    pub fn has_handler(&self, op_code: OpCode) -> bool {
        self.handlers.contains_key(&op_code)
    }

    /// Registered opcodes
    pub fn op_codes(&self) -> impl Iterator<Item = OpCode> + '_ {
        self.handlers.keys().copied()
    }

    fn register<F, Fut>(mut self, op_code: OpCode, mode: Mode, handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let call: HandlerFn =
            Arc::new(move |envelope: Envelope| -> HandlerFuture { Box::pin(handler(envelope)) });
        if self.handlers.insert(op_code, Handler { mode, call }).is_some() {
            tracing::warn!(%op_code, "Replacing existing handler");
        }
        self
    }

    /// Route a parsed envelope to its handler.
    pub async fn dispatch_envelope(&self, envelope: Envelope) -> DispatchOutcome {
        let op_code = envelope.op_code();
        let Some(handler) = self.handlers.get(&op_code) else {
            tracing::trace!(%op_code, "No handler registered");
            return DispatchOutcome::Unhandled(op_code);
        };

        let future = (handler.call)(envelope);
        if handler.mode == Mode::Inline || op_code.is_handshake() {
            future.await;
        } else {
            tokio::spawn(future);
        }
        DispatchOutcome::Handled(op_code)
    }

    /// Route a parsed inbound message; unknown tags are logged and dropped.
    pub async fn dispatch_inbound(&self, inbound: Inbound) -> DispatchOutcome {
        match inbound {
            Inbound::Envelope(envelope) => self.dispatch_envelope(envelope).await,
            Inbound::Unrecognized(tag) => {
                tracing::debug!(%tag, "Dropping message with unrecognized opcode");
                DispatchOutcome::Unrecognized(tag)
            },
        }
    }

    /// Parse decoded frame bytes and route them.
    ///
    /// Errors only when the bytes are not a JSON object.
    pub async fn dispatch(&self, bytes: &[u8]) -> Result<DispatchOutcome> {
        let inbound = Envelope::parse(bytes)?;
        Ok(self.dispatch_inbound(inbound).await)
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut op_codes: Vec<_> = self.handlers.keys().collect();
        op_codes.sort();
        f.debug_struct("MessageDispatcher")
            .field("handlers", &op_codes)
            .finish()
    }
}
