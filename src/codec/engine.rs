//! Session codec: compress-then-encrypt outbound, decrypt-then-decompress
//! inbound.
//!
//! The inbound path is deliberately lenient. Frames sent before the server
//! holds the session key arrive in plaintext, and compression is skipped
//! whenever it does not pay off, so neither step can be assumed. Each step
//! reports which path it took instead of failing.

use zeroize::Zeroizing;

use super::compression::{Decompression, GzipCodec};
use super::crypto::{Decryption, ServerPublicKey, SessionKeys, SymmetricCipher};
use super::Frame;
use crate::error::Result;

/// Which path the decryption step took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptPath {
    /// The frame was AES ciphertext
    Decrypted,
    /// The frame did not decrypt and was kept as is
    PlaintextFallback,
}

/// Which path the decompression step took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressPath {
    /// The (decrypted) frame was a gzip member
    Decompressed,
    /// Not gzip; passed through unchanged
    RawFallback,
}

/// Result of decoding one inbound frame
#[derive(Clone)]
pub struct Decoded {
    /// Decoded payload
    pub bytes: Zeroizing<Vec<u8>>,
    /// Decryption step outcome
    pub decryption: DecryptPath,
    /// Decompression step outcome
    pub decompression: DecompressPath,
}

impl Decoded {
    /// Decoded payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the frame was AES ciphertext
    pub fn is_decrypted(&self) -> bool {
        self.decryption == DecryptPath::Decrypted
    }

    /// Whether a gzip member was inflated
    pub fn is_decompressed(&self) -> bool {
        self.decompression == DecompressPath::Decompressed
    }
}

impl std::fmt::Debug for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoded")
            .field("len", &self.bytes.len())
            .field("decryption", &self.decryption)
            .field("decompression", &self.decompression)
            .finish()
    }
}

/// Codec bound to one set of session keys
#[derive(Debug, Clone)]
pub struct SessionCodec {
    cipher: SymmetricCipher,
    gzip: GzipCodec,
}

impl SessionCodec {
    /// Create a codec over the given session keys
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            cipher: SymmetricCipher::new(keys),
            gzip: GzipCodec::new(),
        }
    }

    /// Use a custom gzip configuration
    pub fn with_gzip(mut self, gzip: GzipCodec) -> Self {
        self.gzip = gzip;
        self
    }

    /// Session keys this codec encrypts with
    pub fn keys(&self) -> &SessionKeys {
        self.cipher.keys()
    }

    /// Compress (when it shrinks the payload), then AES-encrypt.
    pub fn encode_symmetric(&self, plain: &[u8]) -> Result<Frame> {
        let (body, compressed) = self.gzip.compress_opportunistic(plain)?;
        let body = Zeroizing::new(body);
        tracing::trace!(
            plain_len = plain.len(),
            body_len = body.len(),
            compressed,
            "Encoding symmetric frame"
        );
        let ciphertext = self
            .cipher
            .encrypt(&body)
            .map_err(crate::codec::crypto::CryptoError::from)?;
        Ok(Frame::new(ciphertext))
    }

    /// RSA-encrypt for the server. No compression is applied.
    pub fn encode_asymmetric(&self, plain: &[u8], public_key: &ServerPublicKey) -> Result<Frame> {
        let ciphertext = public_key
            .encrypt(plain)
            .map_err(crate::codec::crypto::CryptoError::from)?;
        Ok(Frame::new(ciphertext))
    }

    /// Decrypt then decompress, falling back at each step. Never fails.
    pub fn decode(&self, frame: &[u8]) -> Decoded {
        let decryption: Decryption = self.cipher.decrypt_lenient(frame);
        let path = if decryption.is_decrypted() {
            DecryptPath::Decrypted
        } else {
            DecryptPath::PlaintextFallback
        };
        let intermediate = Zeroizing::new(decryption.into_bytes());
        Self::finish(self.gzip.decompress_lenient(&intermediate), path)
    }

    /// Decompress only, treating the frame as plaintext.
    pub fn decode_plaintext(&self, frame: &[u8]) -> Decoded {
        Self::finish(
            self.gzip.decompress_lenient(frame),
            DecryptPath::PlaintextFallback,
        )
    }

    fn finish(decompression: Decompression, decryption: DecryptPath) -> Decoded {
        let path = if decompression.is_decompressed() {
            DecompressPath::Decompressed
        } else {
            DecompressPath::RawFallback
        };
        Decoded {
            bytes: Zeroizing::new(decompression.into_bytes()),
            decryption,
            decompression: path,
        }
    }
}
