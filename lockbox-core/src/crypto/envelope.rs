//! Authenticated encryption envelopes.
//!
//! Every encrypted field in a CarePackage or LoginPackage is one of these
//! self-describing records: AES-256-GCM with a random 16-byte IV and a
//! 16-byte authentication tag, byte fields base64-encoded on the wire.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use serde::{Deserialize, Serialize};

use crate::crypto::SecretBytes;
use crate::error::{LoginError, LoginResult};

/// AES-256-GCM with a 16-byte nonce, matching the wire format.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// Algorithm tag identifying AES-256 in an authenticated mode.
pub const ENVELOPE_ALG_AES256: &str = "AES256";

/// IV length in bytes.
pub const ENVELOPE_IV_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const ENVELOPE_TAG_LEN: usize = 16;

/// A self-describing encrypted envelope.
///
/// Wire order is `alg, iv, ct, tag`; the byte fields are base64.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Algorithm tag; only [`ENVELOPE_ALG_AES256`] is recognized.
    pub alg: String,
    /// Random initialization vector.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext.
    #[serde(with = "base64_bytes")]
    pub ct: Vec<u8>,
    /// Authentication tag.
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Encrypts `plaintext` under a 32-byte key with a fresh random IV.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Internal`] if the key is not 32 bytes; this
    /// is a programmer error, since every key in the derivation table is
    /// a 32-byte scrypt output.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn seal(plaintext: &[u8], key: &SecretBytes) -> LoginResult<Self> {
        let cipher = EnvelopeCipher::new_from_slice(key.as_bytes())
            .map_err(|_| LoginError::internal("envelope key must be 32 bytes"))?;

        let mut iv = vec![0u8; ENVELOPE_IV_LEN];
        getrandom::getrandom(&mut iv).expect("getrandom failed");

        let mut sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
            .map_err(|_| LoginError::internal("AES-GCM encryption failed"))?;
        let tag = sealed.split_off(sealed.len() - ENVELOPE_TAG_LEN);

        Ok(Self {
            alg: ENVELOPE_ALG_AES256.to_string(),
            iv,
            ct: sealed,
            tag,
        })
    }

    /// Decrypts the envelope under a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::DecryptFailure`] on tag mismatch, unknown
    /// algorithm, or a malformed IV/tag. Callers decide whether that means
    /// a wrong password (password-derived key) or corrupt local state
    /// (username-derived key).
    pub fn open(&self, key: &SecretBytes) -> LoginResult<SecretBytes> {
        if self.alg != ENVELOPE_ALG_AES256 {
            return Err(LoginError::decrypt(format!(
                "unsupported envelope algorithm '{}'",
                self.alg
            )));
        }
        if self.iv.len() != ENVELOPE_IV_LEN || self.tag.len() != ENVELOPE_TAG_LEN {
            return Err(LoginError::decrypt("malformed envelope IV or tag"));
        }

        let cipher = EnvelopeCipher::new_from_slice(key.as_bytes())
            .map_err(|_| LoginError::internal("envelope key must be 32 bytes"))?;

        let mut sealed = Vec::with_capacity(self.ct.len() + self.tag.len());
        sealed.extend_from_slice(&self.ct);
        sealed.extend_from_slice(&self.tag);

        let plaintext = cipher
            .decrypt(Nonce::<U16>::from_slice(&self.iv), sealed.as_slice())
            .map_err(|_| LoginError::decrypt("authentication failed"))?;

        Ok(SecretBytes::new(plaintext))
    }
}

pub(crate) mod base64_bytes {
    //! Serde adapter for base64-encoded byte fields.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(&text).map_err(serde::de::Error::custom)
    }
}
