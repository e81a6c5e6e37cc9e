//! Client facade.
//!
//! Wires the rate limiter in front of the connection manager: outbound
//! envelopes in a throttled category are checked against their cooldown
//! before they are encoded, and only a send that reaches the transport
//! starts the next cooldown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::MessageDispatcher;
use crate::error::Result;
use crate::protocol::{Envelope, HandshakePhase};
use crate::ratelimit::RateLimiterRegistry;
use crate::transport::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, SendOutcome,
    WebSocketConnector,
};

/// Result of [`ChatClient::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Written to the transport
    Sent,
    /// No link; nothing was sent
    NotConnected,
    /// Session key not delivered yet; nothing was sent
    HandshakePending,
    /// Category still cooling down; nothing was sent
    Throttled {
        /// Time until the next send in this category is allowed
        remaining: Duration,
    },
}

impl From<SendOutcome> for SendDecision {
    fn from(outcome: SendOutcome) -> Self {
        match outcome {
            SendOutcome::Sent => SendDecision::Sent,
            SendOutcome::NotConnected => SendDecision::NotConnected,
            SendOutcome::HandshakePending => SendDecision::HandshakePending,
        }
    }
}

/// Chat transport client
#[derive(Debug, Clone)]
pub struct ChatClient {
    manager: ConnectionManager,
    limits: Arc<RateLimiterRegistry>,
}

impl ChatClient {
    /// Create a client over any connector
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        dispatcher: MessageDispatcher,
    ) -> Result<Self> {
        Ok(Self {
            manager: ConnectionManager::new(config, connector, dispatcher)?,
            limits: Arc::new(RateLimiterRegistry::from_config(&config.limits)),
        })
    }

    /// Create a client for the configured WebSocket endpoint.
    ///
    /// Fails with a config error when the endpoint is missing or invalid.
    pub fn websocket(config: &Config, dispatcher: MessageDispatcher) -> Result<Self> {
        config.validate()?;
        let connector = WebSocketConnector::from_config(&config.client)?;
        Self::new(config, Arc::new(connector), dispatcher)
    }

    /// Spawn the connection supervisor
    pub fn start(&self) -> Result<JoinHandle<()>> {
        self.manager.start()
    }

    /// Start if needed and wait for a link
    pub async fn connect(&self) -> Result<()> {
        self.manager.connect().await
    }

    /// Close and stop reconnecting
    pub fn close(&self, reason: impl Into<String>) {
        self.manager.close(reason);
    }

    /// Send an envelope, subject to its category cooldown.
    pub async fn send(&self, envelope: &Envelope) -> Result<SendDecision> {
        let op_code = envelope.op_code();
        let decision = self.limits.check(op_code);
        if !decision.allowed {
            return Ok(SendDecision::Throttled {
                remaining: decision.remaining,
            });
        }

        let outcome = self.manager.send(envelope).await?;
        if outcome == SendOutcome::Sent {
            self.limits.commit(op_code);
        }
        Ok(outcome.into())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Handshake phase of the current connection
    pub async fn handshake_phase(&self) -> HandshakePhase {
        self.manager.handshake_phase().await
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    /// Receive connection events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe_events()
    }

    /// Underlying connection manager
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Cooldown registry
    pub fn limits(&self) -> &RateLimiterRegistry {
        &self.limits
    }
}
