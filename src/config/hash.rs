//! Parameter fingerprints for change detection.
//!
//! A fingerprint covers the template parameters and tags a deploy would
//! submit. Comparing the desired fingerprint with the one computed from the
//! live stack tells the deployer whether an update would be a no-op.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hasher for stack parameter sets.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a fingerprint of parameters and tags.
    ///
    /// Keys are visited in sorted order so the result does not depend on
    /// insertion order. A separator byte keeps `("ab", "c")` distinct from
    /// `("a", "bc")`.
    #[must_use]
    pub fn hash_stack_inputs(
        &self,
        parameters: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
    ) -> String {
        let mut hasher = Sha256::new();

        hasher.update(b"parameters");
        for (key, value) in parameters {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }

        hasher.update(b"tags");
        for (key, value) in tags {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Returns the first 8 characters of a hash for display.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
