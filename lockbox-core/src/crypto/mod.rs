//! Cryptographic primitives for the login core.
//!
//! Pure, stateless operations: scrypt key derivation under named parameter
//! records, authenticated envelope encryption, and random byte generation.

mod envelope;
mod secret;
mod snrp;

pub use envelope::{EncryptedEnvelope, ENVELOPE_ALG_AES256, ENVELOPE_IV_LEN, ENVELOPE_TAG_LEN};
pub use secret::SecretBytes;
pub use snrp::{scrypt_snrp, Snrp, SCRYPT_OUTPUT_LEN, SNRP_SALT_LEN};

#[cfg(test)]
pub(crate) use snrp::fast_snrp;

/// Generates `len` cryptographically random bytes.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    bytes
}
