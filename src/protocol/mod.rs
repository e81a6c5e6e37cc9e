//! Chatlink wire protocol: opcodes, envelopes and the session handshake.
//!
//! Every frame on the wire is a JSON document tagged with an [`OpCode`].
//! Before application traffic can be encrypted the client and server run a
//! three-message key exchange.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                 Server
//!    |                                     |
//!    |<-------- ReceiveRSA (plain) --------|  server public key
//!    |--------- SendAes (RSA) ------------>|  session key + IV
//!    |<-------- ServerReadyToReceive ------|
//!    |                                     |
//!    |========= application (AES) ========>|
//!    |<======== application (AES) =========|
//! ```
//!
//! ## Handshake Phases
//!
//! | Phase         | Description                          | Application sends |
//! |---------------|--------------------------------------|-------------------|
//! | `AwaitingKey` | Connected, no public key yet         | refused           |
//! | `KeySent`     | `SendAes` written                    | allowed           |
//! | `Ready`       | Server confirmed                     | allowed           |
//!
//! The phase resets to `AwaitingKey` on every new connection.
//!
//! ## Opcodes
//!
//! | Code | Name                    | Direction        |
//! |------|-------------------------|------------------|
//! | 0    | `ReceiveRSA`            | server → client  |
//! | 1    | `SendAes`               | client → server  |
//! | 2    | `ServerReadyToReceive`  | server → client  |
//! | 3-4  | create account req/ans  | both             |
//! | 5-6  | login req/ans           | both             |
//! | 7-8  | verification            | both             |
//! | 9-10 | auto-login req/ans      | both             |
//! | 11   | `UpdateRelationship`    | client → server  |
//!
//! Inbound frames may carry the tag as `code` or `opCode`, as a number or a
//! (case-insensitive) name. Outbound frames always use a numeric `code`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatlink::protocol::{Envelope, Inbound, OpCode};
//!
//! let login = Envelope::new(OpCode::RequestLogin)
//!     .with_field("user", serde_json::json!({"name": "alice"}));
//! let bytes = login.to_bytes()?;
//!
//! match Envelope::parse(&bytes)? {
//!     Inbound::Envelope(env) => assert_eq!(env.op_code(), OpCode::RequestLogin),
//!     Inbound::Unrecognized(tag) => println!("dropping {tag}"),
//! }
//! ```

mod handshake;
mod message;
mod session;

pub use handshake::{HandshakeProtocol, KeyExchange, AES_KEY_FIELD, PUBLIC_KEY_FIELDS};
pub use message::{Direction, Envelope, Inbound, OpCode, ALT_CODE_FIELD, CODE_FIELD};
pub use session::{HandshakePhase, KeyPolicy, Session, SessionStats};
