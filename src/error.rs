//! Chatlink error types.
//!
//! # Error Classification
//!
//! Errors follow the transport's recovery policy:
//!
//! - **Transport**: connect/send/receive failures. Contained inside the
//!   connection manager and recovered by the reconnect loop.
//! - **Decode**: a frame that survived the lenient codec fallbacks but still
//!   could not be read. The frame is dropped and the connection is recycled.
//! - **Protocol**: malformed envelopes and handshake payloads.
//! - **Config**: missing or invalid endpoint. Fatal, no transport is possible.
//!
//! Unrecognized opcodes and rate-limit rejections are not errors; they are
//! reported as values ([`DispatchOutcome`](crate::dispatch::DispatchOutcome),
//! [`RateLimitDecision`](crate::ratelimit::RateLimitDecision)).
//!
//! The `Crypto` variant preserves the full error chain via `#[source]`.

use thiserror::Error;

use crate::codec::crypto::CryptoError;

/// Chatlink errors.
#[derive(Error, Debug)]
pub enum ChatLinkError {
    /// Transport-level failure (connect, send or receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame could not be decoded into an envelope.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol-level error (malformed envelope or handshake payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Compression operation failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// The connection was closed locally and will not reconnect.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The server closed the connection.
    #[error("Closed by peer: {0}")]
    PeerClosed(String),

    /// Cryptographic operation failed.
    ///
    /// This variant preserves the full error chain via `#[source]`,
    /// enabling tools like `anyhow` to display the complete context.
    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chatlink operations
pub type Result<T> = std::result::Result<T, ChatLinkError>;

impl ChatLinkError {
    /// Whether the reconnect loop should recover from this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::ConnectionClosed)
    }
}

impl From<CryptoError> for ChatLinkError {
    fn from(err: CryptoError) -> Self {
        ChatLinkError::Crypto(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatLinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatLinkError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for ChatLinkError {
    fn from(err: toml::de::Error) -> Self {
        ChatLinkError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for ChatLinkError {
    fn from(err: base64::DecodeError) -> Self {
        ChatLinkError::Protocol(format!("Base64 decode error: {err}"))
    }
}
