//! # Chatlink - Secure Chat Transport
//!
//! Client-side transport for a chat application: one persistent WebSocket
//! connection to one server, a hybrid RSA/AES session handshake, a
//! compress-then-encrypt frame codec, opcode dispatch and client-side
//! cooldowns.
//!
//! ## Features
//!
//! - **Always reconnecting**: fixed-delay retry, automatic reconnect after
//!   any transport or decode failure, observable state and events
//! - **Hybrid handshake**: server RSA key, client AES-256 session key
//! - **Lenient codec**: gzip when it pays off, AES-256-CBC, silent
//!   plaintext/raw fallbacks reported as typed outcomes
//! - **Opcode dispatch**: handlers registered per opcode, spawned or awaited
//! - **Cooldowns**: per-category client-side rate limiting
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                 Server
//!    |                                     |
//!    |============ connect ===============>|
//!    |<-------- ReceiveRSA (plain) --------|
//!    |--------- SendAes (RSA-OAEP) ------->|
//!    |<-------- ServerReadyToReceive ------|
//!    |                                     |
//!    |==== gzip? + AES-256-CBC frames ====>|
//!    |<=== gzip? + AES-256-CBC frames =====|
//! ```
//!
//! ### Connection State Machine
//!
//! ```text
//!                 start()/connect()
//!   [Disconnected] ───────────────> [Connecting] ──┐ retry every
//!         ^                              │   ^     │ reconnect_delay
//!         │                              │   └─────┘
//!         │                    link up   v
//!         │                         [Connected]
//!         │   close, error,              │
//!         │   undecodable frame          v
//!         └──────────────────────── [Closing]
//!               (reconnects unless closed locally)
//! ```
//!
//! ### Frame Codec
//!
//! | Direction | Steps                                 | Fallback                     |
//! |-----------|---------------------------------------|------------------------------|
//! | Outbound  | gzip (if smaller) → AES-256-CBC       | raw bytes when gzip grows    |
//! | Handshake | RSA-OAEP (SHA-256)                    | none                         |
//! | Inbound   | AES-256-CBC → gunzip                  | input bytes at either step   |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chatlink::{ChatClient, Config, Envelope, MessageDispatcher, OpCode, SendDecision};
//!
//! let config = Config::load(None)?;
//! let (tx, mut answers) = tokio::sync::mpsc::unbounded_channel();
//! let dispatcher = MessageDispatcher::new().forward(OpCode::AnswerLogin, tx);
//!
//! let client = ChatClient::websocket(&config, dispatcher)?;
//! client.connect().await?;
//!
//! let login = Envelope::new(OpCode::RequestLogin)
//!     .with_field("user", serde_json::json!({"name": "alice", "password": "..."}));
//! match client.send(&login).await? {
//!     SendDecision::Sent => {}
//!     SendDecision::Throttled { remaining } => println!("wait {remaining:?}"),
//!     other => println!("not sent: {other:?}"),
//! }
//!
//! if let Some(answer) = answers.recv().await {
//!     println!("login answer: {:?}", answer.fields());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Session codec (gzip, AES-256-CBC, RSA-OAEP)
//! - [`protocol`]: Opcodes, envelopes, session state and the handshake
//! - [`transport`]: Connection manager and connectors
//! - [`dispatch`]: Opcode to handler routing
//! - [`ratelimit`]: Client-side cooldowns
//! - [`client`]: Facade wiring the pieces together
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod ratelimit;
pub mod transport;

// Re-exports for convenience
pub use client::{ChatClient, SendDecision};
pub use codec::{DecompressPath, Decoded, DecryptPath, Frame, SessionCodec};
pub use config::Config;
pub use dispatch::{DispatchOutcome, MessageDispatcher};
pub use error::{ChatLinkError, Result};
pub use protocol::{Envelope, HandshakePhase, Inbound, KeyPolicy, OpCode, Session};
pub use ratelimit::{ActionCategory, RateLimitDecision, RateLimiter, RateLimiterRegistry};
pub use transport::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, MemoryConnector, SendOutcome,
    WebSocketConnector,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
