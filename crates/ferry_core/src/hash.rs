//! Stable cache keys for memoized agent results.
//!
//! Uses BLAKE3 over a length-prefixed encoding of the key parts, so
//! `("ab", "c")` and `("a", "bc")` never collide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cache key (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// The number of bytes in a key
    pub const LEN: usize = 32;

    /// Derive a key from the identity of the analysed target and the kind of analysis
    #[must_use]
    pub fn derive(target: &str, kind: &str) -> Self {
        Self::from_parts(&[target, kind])
    }

    /// Derive a key from an ordered list of parts
    #[must_use]
    pub fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(parts.len() as u64).to_le_bytes());
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(hex).map_err(|_| HashError::InvalidHex)?;
        if bytes.len() != Self::LEN {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for CacheKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Cache key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Invalid hex encoding
    #[error("Invalid hex encoding")]
    InvalidHex,
    /// Invalid length (not 32 bytes)
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_derive_is_stable() {
        let a = CacheKey::derive("acme-corp", "revenue_by_edition");
        let b = CacheKey::derive("acme-corp", "revenue_by_edition");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_separates_parts() {
        let a = CacheKey::derive("ab", "c");
        let b = CacheKey::derive("a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_changes_key() {
        let a = CacheKey::derive("acme-corp", "cohort");
        let b = CacheKey::derive("acme-corp", "segmentation");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = CacheKey::derive("t", "k");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(CacheKey::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn test_from_hex_errors() {
        assert_eq!(CacheKey::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(CacheKey::from_hex("abcd"), Err(HashError::InvalidLength(2)));
    }

    proptest! {
        #[test]
        fn prop_distinct_splits_never_collide(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            let joined = format!("{a}{b}");
            prop_assume!(!b.is_empty());
            let split = CacheKey::derive(&a, &b);
            let shifted = CacheKey::derive(&joined, "");
            prop_assert_ne!(split, shifted);
        }
    }
}
