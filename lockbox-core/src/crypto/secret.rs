//! Zero-on-drop container for secret byte strings.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// An owned secret byte string.
///
/// Every derived key, password, and master key in the login core lives in
/// one of these. The bytes are overwritten with zeros when the container
/// is dropped, so evicting a cache entry scrubs everything it held.
///
/// # Security
///
/// - Never logged; `Debug` prints `[REDACTED]`.
/// - Callers that need the raw bytes borrow them via [`SecretBytes::as_bytes`];
///   the borrow must not outlive the owning cache entry.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Creates a secret from an owned byte vector.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Creates a secret by copying a byte slice.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Creates a secret from the concatenation of two byte slices.
    ///
    /// Used for the `L || P` and `L || RA` constructions.
    #[must_use]
    pub fn concat(left: &[u8], right: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(left.len() + right.len());
        bytes.extend_from_slice(left);
        bytes.extend_from_slice(right);
        Self(bytes)
    }

    /// Returns a reference to the raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretBytes").field(&"[REDACTED]").finish()
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat() {
        let secret = SecretBytes::concat(b"alice", b"hunter2");
        assert_eq!(secret.as_bytes(), b"alicehunter2");
        assert_eq!(secret.len(), 12);
    }

    #[test]
    fn test_debug_redacted() {
        let secret = SecretBytes::from_slice(b"hunter2");
        let debug = format!("{secret:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_equality_is_byte_equality() {
        let a = SecretBytes::from_slice(b"same");
        let b = SecretBytes::new(b"same".to_vec());
        let c = SecretBytes::from_slice(b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
