//! Cryptographic primitives for the chatlink session codec.
//!
//! Two ciphers are used, each for exactly one job:
//!
//! - **RSA-OAEP (SHA-256)**: wraps the session key for the server. Used once
//!   per connection, for the `SendAes` handshake frame.
//! - **AES-256-CBC (PKCS#7)**: encrypts every other frame with the session
//!   key and the session IV.
//!
//! # Key Exchange
//!
//! ```text
//! Server                                   Client
//!    |                                        |
//!    |---- ReceiveRSA (public key) --------->|  plaintext frame
//!    |                                        |  SessionKeys::generate()
//!    |<--- SendAes RSA(key || iv) -----------|  asymmetric frame
//!    |                                        |
//!    |---- ServerReadyToReceive ------------>|  AES frames from here on
//!    |<=== AES(gzip?(payload)) =============>|
//! ```
//!
//! The IV is fixed for the lifetime of the session keys. Key material is
//! redacted from `Debug` output and zeroized on drop.

mod asymmetric;
mod error;
mod symmetric;

pub use asymmetric::{AsymmetricError, ServerPublicKey};
pub use error::CryptoError;
pub use symmetric::{Decryption, SessionKeys, SymmetricCipher, SymmetricError};

/// Session key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// Session IV size (128 bits, one AES block)
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;
