//! Unified cryptographic error type for chatlink.
//!
//! Aggregates the symmetric and asymmetric error types so the full chain is
//! preserved through `#[source]`.

use thiserror::Error;

use super::asymmetric::AsymmetricError;
use super::symmetric::SymmetricError;

/// Unified error type for all cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AES session cipher error.
    #[error("AES: {0}")]
    Symmetric(#[source] SymmetricError),

    /// RSA key parsing or encryption error.
    #[error("RSA: {0}")]
    Asymmetric(#[source] AsymmetricError),

    /// System RNG failure while generating key material.
    ///
    /// Rare but catastrophic: the entropy source is unavailable.
    #[error("RNG failure: {0}")]
    Rng(String),
}

impl From<SymmetricError> for CryptoError {
    fn from(err: SymmetricError) -> Self {
        CryptoError::Symmetric(err)
    }
}

impl From<AsymmetricError> for CryptoError {
    fn from(err: AsymmetricError) -> Self {
        CryptoError::Asymmetric(err)
    }
}
