//! # Hashing Utilities
//!
//! SHA-256 is used for everything that is signed offchain: observation,
//! prepare, commit and timestamp signatures all commit to a domain-separated
//! SHA-256 digest. Keccak256 is kept for Ethereum-compatible onchain report
//! digests.
//!
//! ## Streaming Hasher
//!
//! Signed protocol payloads are hashed incrementally with [`Hasher`], which
//! encodes integers as big-endian `u64` and variable-length blobs with a
//! `u64` length prefix:
//!
//! ```rust
//! use ocr3_crypto::hash::Hasher;
//!
//! let mut hasher = Hasher::with_domain(b"ocr3 Example");
//! hasher.update_u64(7);
//! hasher.update_len_prefixed(b"payload");
//! let hash = hasher.finalize();
//! assert_eq!(hash.len(), 32);
//! ```

use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Prefix prepended to every domain-separated digest before it is signed.
pub const SIGNATURE_PREFIX: &[u8] = b"ocr3";

/// Keccak256 of `data`.
///
/// ```rust
/// assert_eq!(ocr3_crypto::keccak256(b"").len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Keccak256 over `parts` as if they were one buffer.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    parts
        .iter()
        .fold(Keccak256::new(), |h, part| h.chain_update(part))
        .finalize()
        .into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over `parts` as if they were one buffer.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    parts
        .iter()
        .fold(Sha256::new(), |h, part| h.chain_update(part))
        .finalize()
        .into()
}

/// Build the byte string that is actually handed to the offchain signer:
/// `"ocr3" ‖ digest`.
pub fn domain_separated_sum(digest: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNATURE_PREFIX.len() + digest.len());
    msg.extend_from_slice(SIGNATURE_PREFIX);
    msg.extend_from_slice(digest);
    msg
}

/// Streaming SHA-256 over protocol fields.
///
/// Integers go in big-endian and blobs carry a big-endian `u64` length
/// prefix, so two different field sequences never produce the same input.
#[derive(Clone, Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a domain separator.
    pub fn with_domain(domain: &[u8]) -> Self {
        Self(Sha256::new_with_prefix(domain))
    }

    /// Raw bytes, no length prefix.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    pub fn update_u8(&mut self, value: u8) {
        self.update(&[value]);
    }

    pub fn update_u64(&mut self, value: u64) {
        self.update(&value.to_be_bytes());
    }

    pub fn update_len_prefixed(&mut self, data: &[u8]) {
        self.update_u64(data.len() as u64);
        self.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Hasher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        let hash = keccak256(b"");
        assert_eq!(
            hex::encode(hash),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_concat_matches_single() {
        assert_eq!(
            keccak256_concat(&[b"hello", b" ", b"world"]),
            keccak256(b"hello world")
        );
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_concat_matches_single() {
        assert_eq!(sha256_concat(&[b"ab", b"cd"]), sha256(b"abcd"));
    }

    #[test]
    fn test_hasher_matches_manual_encoding() {
        let mut hasher = Hasher::with_domain(b"dom");
        hasher.update_u64(5);
        hasher.update_len_prefixed(b"xy");
        hasher.update_u8(1);

        let mut manual = Vec::new();
        manual.extend_from_slice(b"dom");
        manual.extend_from_slice(&5u64.to_be_bytes());
        manual.extend_from_slice(&2u64.to_be_bytes());
        manual.extend_from_slice(b"xy");
        manual.push(1);

        assert_eq!(hasher.finalize(), sha256(&manual));
    }

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let mut a = Hasher::new();
        a.update_len_prefixed(b"ab");
        a.update_len_prefixed(b"c");

        let mut b = Hasher::new();
        b.update_len_prefixed(b"a");
        b.update_len_prefixed(b"bc");

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_domain_separated_sum() {
        let digest = [7u8; 32];
        let msg = domain_separated_sum(&digest);
        assert_eq!(&msg[..4], b"ocr3");
        assert_eq!(&msg[4..], &digest);
    }
}
