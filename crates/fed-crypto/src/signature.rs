//! Signature errors.

use thiserror::Error;

/// Error type for key loading, signing and verification.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Verification failed.
    #[error("signature verification failed")]
    Verification,

    /// Invalid key format.
    #[error("invalid key format: {0}")]
    InvalidKey(String),

    /// Invalid certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Algorithm not supported for this key or operation.
    #[error("algorithm not supported: {0}")]
    UnsupportedAlgorithm(String),
}
