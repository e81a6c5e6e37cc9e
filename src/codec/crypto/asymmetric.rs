//! RSA-OAEP wrapping of the session key.
//!
//! The server advertises its RSA public key in the `ReceiveRSA` frame. Both
//! SPKI ("BEGIN PUBLIC KEY") and PKCS#1 ("BEGIN RSA PUBLIC KEY") encodings are
//! accepted, either as PEM or as bare base64 DER.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

/// OAEP overhead for SHA-256: two digests plus two bytes
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Errors from RSA operations
#[derive(Debug, Error)]
pub enum AsymmetricError {
    /// Public key could not be parsed
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    /// Encryption failed (usually message too long for the modulus)
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// RSA public key received from the server
#[derive(Clone, PartialEq, Eq)]
pub struct ServerPublicKey {
    inner: RsaPublicKey,
}

impl ServerPublicKey {
    /// Parse a PEM or base64-DER encoded public key.
    pub fn parse(encoded: &str) -> Result<Self, AsymmetricError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(AsymmetricError::InvalidKey("empty key".to_string()));
        }

        if trimmed.starts_with("-----BEGIN") {
            let inner = RsaPublicKey::from_public_key_pem(trimmed)
                .or_else(|_| RsaPublicKey::from_pkcs1_pem(trimmed))
                .map_err(|e| AsymmetricError::InvalidKey(e.to_string()))?;
            return Ok(Self { inner });
        }

        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let der = BASE64
            .decode(compact)
            .map_err(|e| AsymmetricError::InvalidKey(format!("base64: {e}")))?;
        Self::from_der(&der)
    }

    /// Parse DER bytes (SPKI first, then PKCS#1).
    pub fn from_der(der: &[u8]) -> Result<Self, AsymmetricError> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .or_else(|_| RsaPublicKey::from_pkcs1_der(der))
            .map_err(|e| AsymmetricError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Modulus size in bytes
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Largest plaintext a single OAEP block can carry
    pub fn max_plaintext_len(&self) -> usize {
        self.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    /// Encrypt with RSA-OAEP (SHA-256).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AsymmetricError> {
        if plaintext.len() > self.max_plaintext_len() {
            return Err(AsymmetricError::Encryption(format!(
                "message too long: {} bytes (limit {})",
                plaintext.len(),
                self.max_plaintext_len()
            )));
        }

        self.inner
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| AsymmetricError::Encryption(e.to_string()))
    }
}

impl From<RsaPublicKey> for ServerPublicKey {
    fn from(inner: RsaPublicKey) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for ServerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServerPublicKey(RSA-{})", self.size() * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;
    use std::sync::OnceLock;

    fn private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
    }

    fn public_key() -> RsaPublicKey {
        RsaPublicKey::from(private_key())
    }

    #[test]
    fn test_parse_spki_pem() {
        let pem = public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let key = ServerPublicKey::parse(&pem).unwrap();
        assert_eq!(key.size(), 256);
    }

    #[test]
    fn test_parse_pkcs1_pem() {
        let pem = public_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        assert!(ServerPublicKey::parse(&pem).is_ok());
    }

    #[test]
    fn test_parse_base64_der() {
        let der = public_key().to_public_key_der().unwrap();
        let encoded = BASE64.encode(der.as_bytes());
        let key = ServerPublicKey::parse(&encoded).unwrap();
        assert_eq!(key, ServerPublicKey::from(public_key()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ServerPublicKey::parse("").is_err());
        assert!(ServerPublicKey::parse("not a key at all").is_err());
        assert!(ServerPublicKey::parse("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----").is_err());
    }

    #[test]
    fn test_encrypt_roundtrip_with_private_key() {
        let key = ServerPublicKey::from(public_key());
        let ciphertext = key.encrypt(b"session key payload").unwrap();
        assert_eq!(ciphertext.len(), key.size());

        let plaintext = private_key()
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"session key payload");
    }

    #[test]
    fn test_encrypt_rejects_oversized_message() {
        let key = ServerPublicKey::from(public_key());
        let too_long = vec![0u8; key.max_plaintext_len() + 1];
        assert!(matches!(
            key.encrypt(&too_long),
            Err(AsymmetricError::Encryption(_))
        ));
    }
}
