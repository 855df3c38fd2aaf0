//! # OCR3 Crypto
//!
//! Cryptographic primitives used by the OCR3 consensus core.
//!
//! | Module | Used for |
//! |---|---|
//! | [`hash`] | SHA-256 digests of signed protocol data, Keccak256 report digests |
//! | [`ed25519`] | offchain signatures exchanged between oracles |
//! | [`ecdsa`] | secp256k1 onchain report signatures |
//! | [`prf`] | HMAC-SHA256 for leader selection and key derivation |
//! | [`permutation`] | keyed shuffles deciding the transmission order |
//!
//! ## Example
//!
//! ```rust
//! use ocr3_crypto::{ed25519, sha256};
//!
//! let digest = sha256(b"observation");
//! let key = ed25519::Ed25519PrivateKey::random();
//! let signature = key.sign(&digest);
//! assert!(key.public_key().verify(&digest, &signature));
//! ```

pub mod ecdsa;
pub mod ed25519;
pub mod hash;
pub mod permutation;
pub mod prf;

pub use ecdsa::{Address, PrivateKey, PublicKey, Signature};
pub use ed25519::{Ed25519PrivateKey, Ed25519PublicKey};
pub use hash::{keccak256, keccak256_concat, sha256, sha256_concat, Hasher};
pub use permutation::permutation;
pub use prf::{hmac_sha256, prf};

/// Failures of key parsing, signing and signer recovery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Scalar is zero or not below the curve order
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Bytes do not encode a curve point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signing failed or the signature bytes are malformed
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// No signer could be recovered from a signature
    #[error("signer recovery failed: {0}")]
    RecoveryFailed(String),

    /// Fixed-size input of the wrong size
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Malformed hex string
    #[error("invalid hex: {0}")]
    HexError(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::HexError(e.to_string())
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offchain_and_onchain_keys_are_independent() {
        let offchain = Ed25519PrivateKey::from_bytes(&[1u8; 32]);
        let onchain = PrivateKey::from_bytes(&[1u8; 32]).unwrap();
        let digest = sha256(b"same seed, different schemes");

        let offchain_sig = offchain.sign(&digest);
        let onchain_sig = onchain.sign_prehash(&digest).unwrap();
        assert_eq!(offchain_sig.len(), ed25519::SIGNATURE_LENGTH);
        assert_eq!(onchain_sig.to_bytes().len(), ecdsa::SIGNATURE_LENGTH);
        assert!(offchain.public_key().verify(&digest, &offchain_sig));
        assert_eq!(onchain_sig.recover_address(&digest).unwrap(), onchain.address());
    }

    #[test]
    fn test_hex_error_conversion() {
        let err: CryptoError = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, CryptoError::HexError(_)));
    }
}
