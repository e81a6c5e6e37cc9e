//! Per-connection session state.
//!
//! A [`Session`] owns the symmetric key material and tracks how far the key
//! exchange has progressed on the current connection. It outlives individual
//! connections: [`Session::begin_connection`] resets the handshake and,
//! depending on [`KeyPolicy`], rotates the keys.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::crypto::{ServerPublicKey, SessionKeys};
use crate::codec::{GzipCodec, SessionCodec};
use crate::error::{ChatLinkError, Result};

/// Key exchange progress on the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Connected, waiting for the server's public key
    AwaitingKey,
    /// Session key delivered, waiting for the server to confirm
    KeySent,
    /// Server confirmed; application traffic is fully encrypted
    Ready,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakePhase::AwaitingKey => "awaiting-key",
            HandshakePhase::KeySent => "key-sent",
            HandshakePhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// When the symmetric session key is regenerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    /// Fresh key and IV for every connection
    #[default]
    PerConnection,
    /// One key and IV for the life of the process
    PerProcess,
}

impl FromStr for KeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "per-connection" | "connection" => Ok(KeyPolicy::PerConnection),
            "per-process" | "process" => Ok(KeyPolicy::PerProcess),
            _ => Err(format!("Unknown key policy: {s}")),
        }
    }
}

/// Session keys, codec and handshake phase
pub struct Session {
    /// Connection ID (changes on every connect)
    id: String,
    phase: HandshakePhase,
    policy: KeyPolicy,
    gzip: GzipCodec,
    codec: Arc<SessionCodec>,
    server_key: Option<ServerPublicKey>,
    /// Connections begun on this session
    connections: u64,
    frames_sent: u64,
    frames_received: u64,
    handshakes_completed: u64,
}

impl Session {
    /// Create a session with freshly generated keys
    pub fn new(policy: KeyPolicy, gzip: GzipCodec) -> Result<Self> {
        let keys = SessionKeys::generate()?;
        Ok(Self::with_keys(keys, policy, gzip))
    }

    /// Create a session over known keys
    pub fn with_keys(keys: SessionKeys, policy: KeyPolicy, gzip: GzipCodec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: HandshakePhase::AwaitingKey,
            policy,
            codec: Arc::new(SessionCodec::new(keys).with_gzip(gzip.clone())),
            gzip,
            server_key: None,
            connections: 0,
            frames_sent: 0,
            frames_received: 0,
            handshakes_completed: 0,
        }
    }

    /// Current connection ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handshake phase
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Key rotation policy
    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Codec for the current keys
    pub fn codec(&self) -> Arc<SessionCodec> {
        Arc::clone(&self.codec)
    }

    /// Current session keys
    pub fn keys(&self) -> &SessionKeys {
        self.codec.keys()
    }

    /// Public key received on this connection, if any
    pub fn server_key(&self) -> Option<&ServerPublicKey> {
        self.server_key.as_ref()
    }

    /// Application frames may be sent once the session key is delivered
    pub fn can_send(&self) -> bool {
        self.phase != HandshakePhase::AwaitingKey
    }

    /// Check if the server confirmed the session key
    pub fn is_ready(&self) -> bool {
        self.phase == HandshakePhase::Ready
    }

    /// Reset for a new connection, rotating keys under
    /// [`KeyPolicy::PerConnection`].
    pub fn begin_connection(&mut self) -> Result<()> {
        if self.connections > 0 && self.policy == KeyPolicy::PerConnection {
            let keys = SessionKeys::generate()?;
            self.codec = Arc::new(SessionCodec::new(keys).with_gzip(self.gzip.clone()));
            tracing::debug!("Rotated session key");
        }
        self.connections += 1;
        self.id = uuid::Uuid::new_v4().to_string();
        self.phase = HandshakePhase::AwaitingKey;
        self.server_key = None;
        Ok(())
    }

    /// Record that the session key was delivered under `server_key`.
    pub fn key_delivered(&mut self, server_key: ServerPublicKey) {
        if self.phase != HandshakePhase::AwaitingKey {
            tracing::warn!(phase = %self.phase, "Server re-sent its public key");
        }
        self.server_key = Some(server_key);
        self.phase = HandshakePhase::KeySent;
    }

    /// Record the server's readiness confirmation.
    pub fn confirm_ready(&mut self) -> Result<()> {
        match self.phase {
            HandshakePhase::KeySent => {
                self.phase = HandshakePhase::Ready;
                self.handshakes_completed += 1;
                Ok(())
            },
            HandshakePhase::Ready => Ok(()),
            HandshakePhase::AwaitingKey => Err(ChatLinkError::Protocol(
                "server ready before session key was sent".to_string(),
            )),
        }
    }

    /// Count an outbound frame
    pub fn record_sent(&mut self) {
        self.frames_sent += 1;
    }

    /// Count an inbound frame
    pub fn record_received(&mut self) {
        self.frames_received += 1;
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            connection_id: self.id.clone(),
            phase: self.phase,
            connections: self.connections,
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            handshakes_completed: self.handshakes_completed,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("policy", &self.policy)
            .field("server_key", &self.server_key)
            .finish_non_exhaustive()
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Current connection ID
    pub connection_id: String,
    /// Handshake phase
    pub phase: HandshakePhase,
    /// Connections begun
    pub connections: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Handshakes that reached `Ready`
    pub handshakes_completed: u64,
}
