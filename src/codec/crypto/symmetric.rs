//! AES-256-CBC session cipher.
//!
//! Ciphertext is the raw CBC output with PKCS#7 padding; nothing is
//! prepended because the IV is part of the session keys.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CryptoError, BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Errors from the session cipher
#[derive(Debug, Error)]
pub enum SymmetricError {
    /// Key or IV has the wrong length
    #[error("Invalid key or IV length")]
    InvalidKey,

    /// Ciphertext is empty or not a whole number of blocks
    #[error("Ciphertext length {0} is not a positive multiple of the block size")]
    InvalidLength(usize),

    /// Padding check failed after decryption
    #[error("Bad padding")]
    BadPadding,
}

/// Session key material: 256-bit key and 128-bit IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl SessionKeys {
    /// Generate fresh key material from the OS CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(Self { key, iv })
    }

    /// Build from known parts.
    pub fn from_parts(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// The 256-bit key
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// The 128-bit IV
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't leak key material in debug output
        write!(f, "SessionKeys([REDACTED])")
    }
}

/// Outcome of a lenient decryption.
///
/// Frames exchanged before the server holds the session key are not
/// symmetrically encrypted, so failing to decrypt is an expected outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption {
    /// Input decrypted and unpadded cleanly.
    Decrypted(Vec<u8>),
    /// Input was not a valid ciphertext; carried through unchanged.
    PlaintextFallback(Vec<u8>),
}

impl Decryption {
    /// The resulting bytes, whichever path was taken
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Decrypted(bytes) | Self::PlaintextFallback(bytes) => bytes,
        }
    }

    /// Whether decryption actually happened
    pub fn is_decrypted(&self) -> bool {
        matches!(self, Self::Decrypted(_))
    }
}

/// AES-256-CBC cipher bound to one set of session keys
#[derive(Debug, Clone)]
pub struct SymmetricCipher {
    keys: SessionKeys,
}

impl SymmetricCipher {
    /// Create a cipher over the given keys
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    /// Key material this cipher uses
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Encrypt with PKCS#7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SymmetricError> {
        let cipher = Aes256CbcEnc::new_from_slices(self.keys.key(), self.keys.iv())
            .map_err(|_| SymmetricError::InvalidKey)?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt and strip PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SymmetricError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(SymmetricError::InvalidLength(ciphertext.len()));
        }

        let cipher = Aes256CbcDec::new_from_slices(self.keys.key(), self.keys.iv())
            .map_err(|_| SymmetricError::InvalidKey)?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| SymmetricError::BadPadding)
    }

    /// Decrypt, falling back to the input bytes when they are not ciphertext.
    pub fn decrypt_lenient(&self, input: &[u8]) -> Decryption {
        match self.decrypt(input) {
            Ok(plaintext) => Decryption::Decrypted(plaintext),
            Err(e) => {
                tracing::trace!(len = input.len(), error = %e, "Frame not decryptable, using plaintext");
                Decryption::PlaintextFallback(input.to_vec())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> SessionKeys {
        SessionKeys::from_parts([0x42u8; KEY_SIZE], [0x07u8; IV_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = SymmetricCipher::new(test_keys());
        let plaintext = b"Hello, World!";

        let ciphertext = cipher.encrypt(plaintext).unwrap();
        assert_eq!(ciphertext.len(), BLOCK_SIZE);
        assert_ne!(&ciphertext[..plaintext.len()], plaintext);

        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fixed_iv_is_deterministic() {
        let cipher = SymmetricCipher::new(test_keys());
        let a = cipher.encrypt(b"same input").unwrap();
        let b = cipher.encrypt(b"same input").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_block_gets_padding_block() {
        let cipher = SymmetricCipher::new(test_keys());
        let ciphertext = cipher.encrypt(&[0u8; BLOCK_SIZE]).unwrap();
        assert_eq!(ciphertext.len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_wrong_key_fails_or_differs() {
        let cipher1 = SymmetricCipher::new(SessionKeys::from_parts([1u8; 32], [0u8; 16]));
        let cipher2 = SymmetricCipher::new(SessionKeys::from_parts([2u8; 32], [0u8; 16]));

        let ciphertext = cipher1.encrypt(b"Hello, World!").unwrap();
        match cipher2.decrypt(&ciphertext) {
            Ok(plaintext) => assert_ne!(plaintext, b"Hello, World!"),
            Err(e) => assert!(matches!(e, SymmetricError::BadPadding)),
        }
    }

    #[test]
    fn test_rejects_partial_block() {
        let cipher = SymmetricCipher::new(test_keys());
        let result = cipher.decrypt(&[0u8; 10]);
        assert!(matches!(result, Err(SymmetricError::InvalidLength(10))));
    }

    #[test]
    fn test_rejects_empty() {
        let cipher = SymmetricCipher::new(test_keys());
        assert!(matches!(
            cipher.decrypt(&[]),
            Err(SymmetricError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_lenient_fallback_returns_input() {
        let cipher = SymmetricCipher::new(test_keys());
        let plain = br#"{"code":0,"publicKey":"abc"}"#;

        let result = cipher.decrypt_lenient(plain);
        assert!(!result.is_decrypted());
        assert_eq!(result.into_bytes(), plain.to_vec());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = SessionKeys::generate().unwrap();
        let b = SessionKeys::generate().unwrap();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn test_debug_is_redacted() {
        let keys = test_keys();
        let debug = format!("{keys:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("42"));
    }
}
