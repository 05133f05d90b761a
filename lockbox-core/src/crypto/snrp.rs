//! Scrypt parameter records and key derivation.
//!
//! An `Snrp` (salt + N + r + p) names one scrypt invocation. SNRP1 is a
//! fixed server-shared record that every device can regenerate; SNRP2/3/4
//! are per-account records with random salts, minted at account creation
//! and persisted in the CarePackage.

use scrypt::Params;
use serde::{Deserialize, Serialize};

use crate::crypto::SecretBytes;
use crate::error::{LoginError, LoginResult};

/// Output length of every scrypt derivation in the login core.
pub const SCRYPT_OUTPUT_LEN: usize = 32;

/// Salt length for freshly-minted client parameter records.
pub const SNRP_SALT_LEN: usize = 32;

/// The fixed salt of the server-shared SNRP1 record.
const SERVER_SALT_HEX: &str = "b5865ffb9fa7b3bfe4b2384d47ce831ee22a4a9d5c34c7ef7d21467cc758f81b";

const DEFAULT_N: u64 = 16384;
const DEFAULT_R: u32 = 1;
const DEFAULT_P: u32 = 1;

/// A scrypt parameter record: salt plus the CPU/memory cost triple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snrp {
    /// Derivation salt, hex-encoded on the wire.
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    /// CPU/memory cost. Must be a power of two.
    pub n: u64,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

impl Snrp {
    /// Returns the globally-fixed SNRP1 record.
    ///
    /// Deterministic: the same on every device and for every account, so
    /// callers can always regenerate the server auth handles `L1`/`LP1`
    /// without any local state.
    ///
    /// # Panics
    ///
    /// Never panics; the embedded salt constant is valid hex.
    #[must_use]
    pub fn server() -> Self {
        Self {
            salt: hex::decode(SERVER_SALT_HEX).expect("fixed salt constant is valid hex"),
            n: DEFAULT_N,
            r: DEFAULT_R,
            p: DEFAULT_P,
        }
    }

    /// Mints a fresh client parameter record with a random salt.
    ///
    /// Suitable for SNRP2/3/4. Each call produces a distinct salt.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn generate_client() -> Self {
        let mut salt = vec![0u8; SNRP_SALT_LEN];
        getrandom::getrandom(&mut salt).expect("getrandom failed");
        Self {
            salt,
            n: DEFAULT_N,
            r: DEFAULT_R,
            p: DEFAULT_P,
        }
    }

    /// Converts the cost triple into validated `scrypt` parameters.
    fn params(&self) -> LoginResult<Params> {
        if !self.n.is_power_of_two() || self.n < 2 {
            return Err(LoginError::key_derivation(format!(
                "scrypt N must be a power of two >= 2, got {}",
                self.n
            )));
        }
        let log_n = u8::try_from(self.n.trailing_zeros())
            .map_err(|_| LoginError::key_derivation("scrypt N out of range"))?;
        Params::new(log_n, self.r, self.p, SCRYPT_OUTPUT_LEN)
            .map_err(|e| LoginError::key_derivation(format!("invalid scrypt parameters: {e}")))
    }
}

/// Derives a 32-byte key from `input` under the given parameter record.
///
/// Deterministic: the same input and record always produce the same key.
///
/// # Errors
///
/// Returns [`LoginError::KeyDerivation`] if the cost record is invalid or
/// the derivation exhausts resources.
pub fn scrypt_snrp(input: &[u8], snrp: &Snrp) -> LoginResult<SecretBytes> {
    let params = snrp.params()?;
    let mut output = vec![0u8; SCRYPT_OUTPUT_LEN];
    scrypt::scrypt(input, &snrp.salt, &params, &mut output)
        .map_err(|e| LoginError::key_derivation(format!("scrypt failed: {e}")))?;
    Ok(SecretBytes::new(output))
}

pub(crate) mod hex_bytes {
    //! Serde adapter for hex-encoded byte fields.

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// A deliberately cheap record so derivation-heavy tests stay fast.
#[cfg(test)]
pub(crate) fn fast_snrp() -> Snrp {
    Snrp {
        salt: vec![0x42; SNRP_SALT_LEN],
        n: 16,
        r: 1,
        p: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_snrp_is_deterministic() {
        assert_eq!(Snrp::server(), Snrp::server());
        assert_eq!(Snrp::server().salt.len(), SNRP_SALT_LEN);
    }

    #[test]
    fn test_client_snrps_differ() {
        let a = Snrp::generate_client();
        let b = Snrp::generate_client();
        assert_ne!(a.salt, b.salt);
        assert_eq!(a.n, b.n);
    }

    #[test]
    fn test_scrypt_deterministic() {
        let snrp = fast_snrp();
        let a = scrypt_snrp(b"alicehunter2", &snrp).unwrap();
        let b = scrypt_snrp(b"alicehunter2", &snrp).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), SCRYPT_OUTPUT_LEN);

        let c = scrypt_snrp(b"alicehunter3", &snrp).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_scrypt_rejects_bad_cost() {
        let mut snrp = fast_snrp();
        snrp.n = 15; // not a power of two
        let result = scrypt_snrp(b"input", &snrp);
        assert!(matches!(result, Err(LoginError::KeyDerivation { .. })));
    }

    #[test]
    fn test_snrp_json_round_trip() {
        let snrp = fast_snrp();
        let text = serde_json::to_string(&snrp).unwrap();
        assert!(text.contains("\"salt\""));
        let back: Snrp = serde_json::from_str(&text).unwrap();
        assert_eq!(snrp, back);
    }
}
