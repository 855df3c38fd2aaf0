//! # Onchain Report Keys (secp256k1)
//!
//! Reports are signed over a 32-byte Keccak256 prehash. A signature is the
//! 65-byte `r ‖ s ‖ v` encoding that EVM contracts feed to `ecrecover`, so
//! whoever checks it only needs the signer's 20-byte address, never the
//! public key itself.
//!
//! ## Example
//!
//! ```rust
//! use ocr3_crypto::{ecdsa::PrivateKey, keccak256};
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"report");
//! let signature = key.sign_prehash(&digest).unwrap();
//!
//! assert_eq!(signature.recover_address(&digest).unwrap(), key.address());
//! ```

use crate::{keccak256, CryptoError, Result};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

/// Ethereum-style 20-byte address
pub type Address = [u8; 20];

/// Length of an encoded signature (r ‖ s ‖ v).
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset added to the recovery id by `eth_sign` style encoders.
const LEGACY_V_OFFSET: u8 = 27;

/// secp256k1 signing key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// A fresh key from the OS RNG.
    pub fn random() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }

    /// Load a key from its 32-byte scalar. Zero and values at or above the
    /// curve order are rejected.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        SigningKey::from_bytes(bytes.into())
            .map(Self)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Shorthand for `self.public_key().to_address()`.
    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    /// Sign a 32-byte digest. The resulting `v` is the raw recovery id (0 or 1).
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<Signature> {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(Signature(bytes))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(0x{})", hex::encode(self.address()))
    }
}

/// secp256k1 verifying key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Last 20 bytes of the Keccak256 of the uncompressed point, without the
    /// `0x04` tag.
    pub fn to_address(&self) -> Address {
        let point = self.0.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        address
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.to_address()))
    }
}

/// Recoverable signature in `r ‖ s ‖ v` layout.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Parse a signature received from a peer.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    /// The encoded signature.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0
    }

    /// Recovery id with the legacy 27/28 offset removed.
    pub fn recovery_id(&self) -> u8 {
        let v = self.0[64];
        if v >= LEGACY_V_OFFSET {
            v - LEGACY_V_OFFSET
        } else {
            v
        }
    }

    /// Recover the key that produced this signature over `digest`.
    pub fn recover_prehash(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let signature = K256Signature::from_slice(&self.0[..64])
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id()).ok_or_else(|| {
            CryptoError::RecoveryFailed(format!("recovery id {} out of range", self.0[64]))
        })?;
        VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map(PublicKey)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))
    }

    /// Address of the signer of `digest`.
    pub fn recover_address(&self, digest: &[u8; 32]) -> Result<Address> {
        self.recover_prehash(digest).map(|key| key.to_address())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation_vector() {
        let mut scalar = [0u8; 32];
        hex::decode_to_slice(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            &mut scalar,
        )
        .unwrap();
        let key = PrivateKey::from_bytes(&scalar).unwrap();
        assert_eq!(
            hex::encode(key.address()),
            "2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }

    #[test]
    fn test_recover_prehash() {
        let key = PrivateKey::random();
        let digest = keccak256(b"report");
        let signature = key.sign_prehash(&digest).unwrap();
        assert_eq!(signature.recover_prehash(&digest).unwrap(), key.public_key());
        assert_ne!(signature.recover_address(&keccak256(b"other")).ok(), Some(key.address()));
    }

    #[test]
    fn test_signature_from_short_slice() {
        assert!(matches!(
            Signature::from_slice(&[0u8; 64]),
            Err(CryptoError::InvalidLength { expected: 65, actual: 64 })
        ));
    }
}
