//! Session key exchange.
//!
//! ```text
//! Client                              Server
//!    |                                  |
//!    |<------- ReceiveRSA (pubkey) -----|  plaintext
//!    |                                  |
//!    |-------- SendAes (key, iv) ------>|  RSA-OAEP, whole frame
//!    |                                  |
//!    |<------- ServerReadyToReceive ----|  AES from here on
//! ```
//!
//! The `SendAes` frame must be the first frame written after `ReceiveRSA`
//! arrives; the connection manager enforces that by holding its write lock
//! across [`HandshakeProtocol::answer_public_key`] and the send.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::message::{Envelope, OpCode};
use super::session::Session;
use crate::codec::crypto::{ServerPublicKey, SessionKeys};
use crate::codec::Frame;
use crate::error::{ChatLinkError, Result};

/// Fields that may carry the server's public key, in lookup order
pub const PUBLIC_KEY_FIELDS: [&str; 3] = ["publicKey", "rsa", "key"];

/// Field carrying the wrapped session key in `SendAes`
pub const AES_KEY_FIELD: &str = "aesKeyData";

/// Prepared `SendAes` answer
#[derive(Debug)]
pub struct KeyExchange {
    /// RSA-encrypted `SendAes` frame
    pub frame: Frame,
    /// Key the frame was encrypted under
    pub server_key: ServerPublicKey,
}

/// Client side of the key exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeProtocol;

impl HandshakeProtocol {
    /// Read the server public key out of a `ReceiveRSA` envelope.
    pub fn extract_public_key(envelope: &Envelope) -> Result<ServerPublicKey> {
        let encoded = PUBLIC_KEY_FIELDS
            .iter()
            .find_map(|field| envelope.field(field).and_then(Value::as_str))
            .ok_or_else(|| {
                ChatLinkError::Protocol("ReceiveRSA carries no public key".to_string())
            })?;
        Ok(ServerPublicKey::parse(encoded).map_err(crate::codec::crypto::CryptoError::from)?)
    }

    /// Build the `SendAes` envelope for the given keys.
    pub fn key_exchange_envelope(keys: &SessionKeys) -> Envelope {
        Envelope::new(OpCode::SendAes).with_field(
            AES_KEY_FIELD,
            json!({
                "key": BASE64.encode(keys.key()),
                "iv": BASE64.encode(keys.iv()),
            }),
        )
    }

    /// Answer a `ReceiveRSA` envelope with an RSA-encrypted `SendAes` frame.
    ///
    /// The session is not modified; call [`Session::key_delivered`] once the
    /// frame has actually been written.
    pub fn answer_public_key(session: &Session, envelope: &Envelope) -> Result<KeyExchange> {
        if envelope.op_code() != OpCode::ReceiveRsa {
            return Err(ChatLinkError::Protocol(format!(
                "expected ReceiveRSA, got {}",
                envelope.op_code()
            )));
        }

        let server_key = Self::extract_public_key(envelope)?;
        let codec = session.codec();
        let payload = Zeroizing::new(Self::key_exchange_envelope(codec.keys()).to_bytes()?);
        let frame = codec.encode_asymmetric(&payload, &server_key)?;

        tracing::debug!(
            server_key = ?server_key,
            frame_len = frame.len(),
            "Prepared session key exchange"
        );
        Ok(KeyExchange { frame, server_key })
    }
}
