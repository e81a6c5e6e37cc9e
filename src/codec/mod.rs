//! Session codec for chatlink frames.
//!
//! Outbound payloads are gzip-compressed (only when that makes them smaller)
//! and then encrypted; inbound frames are decrypted and then decompressed,
//! with a silent fallback at each step.
//!
//! # Pipeline
//!
//! | Direction | Steps                                   | Fallback                     |
//! |-----------|-----------------------------------------|------------------------------|
//! | Outbound  | gzip (opportunistic) → AES-256-CBC      | keep raw bytes if gzip grows |
//! | Handshake | RSA-OAEP(SHA-256)                       | none, caller-selected        |
//! | Inbound   | AES-256-CBC → gunzip                    | input bytes at either step   |
//!
//! There is no in-band marker for "compressed" or "encrypted"; the decoder
//! always attempts both and reports which one applied.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatlink::codec::{SessionCodec, crypto::SessionKeys};
//!
//! let codec = SessionCodec::new(SessionKeys::generate()?);
//! let frame = codec.encode_symmetric(br#"{"code":5}"#)?;
//! let decoded = codec.decode(frame.as_bytes());
//! assert_eq!(decoded.as_bytes(), br#"{"code":5}"#);
//! ```

mod compression;
pub mod crypto;
mod engine;
mod frame;

pub use compression::{Decompression, GzipCodec, DEFAULT_LEVEL, DEFAULT_MAX_FRAME_BYTES};
pub use engine::{DecompressPath, Decoded, DecryptPath, SessionCodec};
pub use frame::Frame;
