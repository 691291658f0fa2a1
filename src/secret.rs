//! An opaque, zeroized-on-drop byte string for the auth token.
//!
//! Grounded on `neuron-secret::SecretValue` / `neuron-auth::AuthToken`:
//! no `Clone`, no `Display`, no `Serialize` — the only way to read the
//! bytes is the scoped `with_bytes` closure, and `Debug` is redacted.

use zeroize::Zeroizing;

/// An in-memory secret. Memory is zeroed on drop.
pub struct SecretBytes {
    inner: Zeroizing<Vec<u8>>,
}

impl SecretBytes {
    /// Wrap `bytes`, taking ownership.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Zeroizing::new(bytes),
        }
    }

    /// Scoped exposure: the bytes are only visible inside the closure.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.inner)
    }

    /// Constant-time-in-practice byte equality (delegates to `subtle`-free
    /// straight comparison since §9 specifies plain byte equality, not a
    /// timing-safe comparison, for the bearer/API-key check).
    pub fn equals_bytes(&self, other: &[u8]) -> bool {
        self.inner.as_slice() == other
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBytes")
            .field("value", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = SecretBytes::new(b"sekrit".to_vec());
        let debug = format!("{secret:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("sekrit"));
    }

    #[test]
    fn equals_bytes_compares_content() {
        let secret = SecretBytes::new(b"token-123".to_vec());
        assert!(secret.equals_bytes(b"token-123"));
        assert!(!secret.equals_bytes(b"token-124"));
    }

    #[test]
    fn with_bytes_exposes_content() {
        let secret = SecretBytes::new(b"abc".to_vec());
        secret.with_bytes(|b| assert_eq!(b, b"abc"));
    }
}
