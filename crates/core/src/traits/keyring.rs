//! Signing key traits.
//!
//! Offchain keys authenticate protocol messages between oracles. Onchain keys
//! sign reports in the format the external target verifies.

use ocr3_crypto::{CryptoError, Ed25519PublicKey};
use ocr3_types::{ConfigDigest, OnchainPublicKey, ReportWithInfo, SeqNr};
use thiserror::Error;

/// Errors produced by keyrings.
#[derive(Error, Debug)]
pub enum KeyringError {
    /// Underlying cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The keyring refused or failed to sign.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result type for keyring operations.
pub type KeyringResult<T> = Result<T, KeyringError>;

/// Signs protocol messages exchanged between oracles.
pub trait OffchainKeyring: Send + Sync + 'static {
    /// Sign an already domain-separated message.
    fn offchain_sign(&self, msg: &[u8]) -> KeyringResult<Vec<u8>>;

    /// Public key other oracles verify our signatures with.
    fn offchain_public_key(&self) -> Ed25519PublicKey;
}

/// Signs reports for the external target.
pub trait OnchainKeyring<RI>: Send + Sync + 'static {
    /// Public key (or address) as registered in the configuration.
    fn public_key(&self) -> OnchainPublicKey;

    /// Sign a report produced in round `seq_nr` of configuration `config_digest`.
    fn sign(
        &self,
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
    ) -> KeyringResult<Vec<u8>>;

    /// Verify a report signature against a configured public key.
    fn verify(
        &self,
        public_key: &[u8],
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
        signature: &[u8],
    ) -> bool;

    /// Upper bound on signature length, used to reject oversized messages.
    fn max_signature_length(&self) -> usize;
}
