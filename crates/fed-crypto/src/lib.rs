//! # fed-crypto
//!
//! Cryptographic building blocks for the fedsso SAML engine, on top of
//! aws-lc-rs.
//!
//! - [`vault`]: zeroizing containers for passphrases and private key bytes
//! - [`keys`]: signing keys loaded from PEM/DER and verification keys taken
//!   from X.509 certificates
//! - [`hash`]: digests used by XML-DSig references and artifacts
//! - [`random`]: identifiers and artifact handles
//!
//! SAML peers still sign with SHA-1 and SHA-256; both are verified here.
//! SHA-1 is accepted for verification and artifact source IDs only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod algorithm;
pub mod hash;
pub mod keys;
pub mod random;
pub mod signature;
pub mod vault;

pub use algorithm::{DigestAlgorithm, SignatureAlgorithm};
pub use hash::{digest, sha1, sha256};
pub use keys::{pem_to_der, verify_issued_by, KeyKind, SigningKey, VerifyingKey};
pub use signature::SignatureError;
pub use vault::{SecretBytes, SecretString, VaultError};
