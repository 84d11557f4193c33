//! Secure random values for protocol identifiers.

use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;

/// Generates random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a random alphanumeric string.
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    Alphanumeric.sample_string(&mut rng, len)
}

/// Generates an opaque name identifier value.
///
/// 32 alphanumeric characters, about 190 bits of entropy.
#[must_use]
pub fn generate_name_identifier() -> String {
    random_alphanumeric(32)
}

/// Generates the 20-byte message handle of an artifact.
#[must_use]
pub fn generate_message_handle() -> [u8; 20] {
    let mut handle = [0u8; 20];
    rand::rng().fill(&mut handle);
    handle
}
