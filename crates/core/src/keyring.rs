//! Concrete keyrings.
//!
//! - [`Ed25519OffchainKeyring`] signs protocol messages with Ed25519.
//! - [`EvmOnchainKeyring`] signs reports with recoverable secp256k1 ECDSA and
//!   identifies oracles by their 20-byte address, the way EVM contracts
//!   verify signers with `ecrecover`.

use crate::traits::{KeyringResult, OffchainKeyring, OnchainKeyring};
use ocr3_crypto::ecdsa::{self, SIGNATURE_LENGTH};
use ocr3_crypto::{keccak256, keccak256_concat, Ed25519PrivateKey, Ed25519PublicKey};
use ocr3_types::{ConfigDigest, OnchainPublicKey, ReportWithInfo, SeqNr};

/// Offchain keyring backed by an Ed25519 key.
#[derive(Clone)]
pub struct Ed25519OffchainKeyring {
    key: Ed25519PrivateKey,
}

impl Ed25519OffchainKeyring {
    /// Wrap an existing key.
    pub fn new(key: Ed25519PrivateKey) -> Self {
        Self { key }
    }

    /// Generate a fresh random key.
    pub fn random() -> Self {
        Self::new(Ed25519PrivateKey::random())
    }
}

impl OffchainKeyring for Ed25519OffchainKeyring {
    fn offchain_sign(&self, msg: &[u8]) -> KeyringResult<Vec<u8>> {
        Ok(self.key.sign(msg))
    }

    fn offchain_public_key(&self) -> Ed25519PublicKey {
        self.key.public_key()
    }
}

/// Onchain keyring producing EVM-style recoverable signatures.
///
/// The signed digest is `keccak256(keccak256(report) ‖ config_digest ‖ seq_nr)`
/// with `seq_nr` as a big-endian u64.
#[derive(Clone)]
pub struct EvmOnchainKeyring {
    key: ecdsa::PrivateKey,
}

impl EvmOnchainKeyring {
    /// Wrap an existing secp256k1 key.
    pub fn new(key: ecdsa::PrivateKey) -> Self {
        Self { key }
    }

    /// Generate a fresh random key.
    pub fn random() -> Self {
        Self::new(ecdsa::PrivateKey::random())
    }

    /// The 20-byte address of this keyring.
    pub fn address(&self) -> ecdsa::Address {
        self.key.public_key().to_address()
    }
}

fn report_digest(config_digest: ConfigDigest, seq_nr: SeqNr, report: &[u8]) -> [u8; 32] {
    keccak256_concat(&[
        &keccak256(report),
        config_digest.as_bytes(),
        &seq_nr.to_be_bytes(),
    ])
}

impl<RI: Send + Sync + 'static> OnchainKeyring<RI> for EvmOnchainKeyring {
    fn public_key(&self) -> OnchainPublicKey {
        self.address().to_vec()
    }

    fn sign(
        &self,
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
    ) -> KeyringResult<Vec<u8>> {
        let digest = report_digest(config_digest, seq_nr, &report.report);
        let signature = self.key.sign_prehash(&digest)?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
        signature: &[u8],
    ) -> bool {
        let Ok(signature) = ecdsa::Signature::from_slice(signature) else {
            return false;
        };
        let digest = report_digest(config_digest, seq_nr, &report.report);
        match signature.recover_prehash(&digest) {
            Ok(recovered) => recovered.to_address().as_slice() == public_key,
            Err(_) => false,
        }
    }

    fn max_signature_length(&self) -> usize {
        SIGNATURE_LENGTH
    }
}
