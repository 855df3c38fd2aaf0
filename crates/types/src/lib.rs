//! # OCR3 Types
//!
//! Core type definitions shared by every OCR3 crate.
//!
//! This crate provides:
//! - [`ConfigDigest`] and [`Timestamp`] - configuration identity and signature scope
//! - [`plugin`] - opaque plugin data (queries, observations, outcomes, reports)
//! - [`signed_data`] - domain-separated signatures and quorum certificates
//! - [`message`] - protocol messages grouped by consuming component
//!
//! ## Example
//!
//! ```rust
//! use ocr3_types::{byzantine_quorum_size, CertifiedPrepareOrCommit};
//!
//! assert_eq!(byzantine_quorum_size(4, 1), 3);
//! assert!(CertifiedPrepareOrCommit::genesis().is_genesis());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config_digest;
pub mod message;
pub mod plugin;
pub mod signed_data;

// Re-export main types at crate root
pub use config_digest::{ConfigDigest, Timestamp};
pub use message::{
    Message, MessageToPacemaker, MessageToReportFinalization, MessageToReportGeneration,
    MessageWithSender,
};
pub use plugin::{
    Account, AttestedReportMany, AttributedObservation, AttributedOnchainSignature, Observation,
    OnchainPublicKey, OracleIdentity, Outcome, OutcomeContext, Query, Report, ReportPlus,
    ReportWithInfo, ReportingPluginInfo, ReportingPluginLimits, TransmissionSchedule,
};
pub use signed_data::{
    make_outcome_digest, make_outcome_inputs_digest, AttributedCommitSignature,
    AttributedPrepareSignature, AttributedSignedHighestCertifiedTimestamp,
    AttributedSignedObservation, CertificateError, CertificateResult, CertifiedCommit,
    CertifiedPrepare, CertifiedPrepareOrCommit, CommitSignature, EpochStartProof,
    HighestCertifiedTimestamp, OutcomeDigest, OutcomeInputsDigest, PrepareSignature,
    SignedHighestCertifiedTimestamp, SignedObservation,
};

/// Index of an oracle in the configuration's identity list.
pub type OracleId = u8;

/// Leadership term; advances via view change.
pub type Epoch = u64;

/// Round sequence number; contiguous within an epoch.
pub type SeqNr = u64;

/// Maximum number of oracles in one configuration.
pub const MAX_ORACLES: usize = 31;

/// Byzantine quorum size: `⌊(n+f)/2⌋ + 1`.
///
/// Any two quorums of this size intersect in at least one honest oracle.
#[inline]
pub fn byzantine_quorum_size(n: usize, f: usize) -> usize {
    (n + f) / 2 + 1
}

/// Result type alias for type-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with OCR3 types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid config digest format
    #[error("invalid config digest: {0}")]
    InvalidDigest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byzantine_quorum_size() {
        assert_eq!(byzantine_quorum_size(4, 1), 3);
        assert_eq!(byzantine_quorum_size(7, 2), 5);
        assert_eq!(byzantine_quorum_size(5, 1), 4);
        assert_eq!(byzantine_quorum_size(31, 10), 21);
    }

    #[test]
    fn test_quorums_intersect_in_honest_oracle() {
        for n in 1..=MAX_ORACLES {
            for f in 0..=((n - 1) / 3) {
                let q = byzantine_quorum_size(n, f);
                assert!(q <= n - f, "n={n} f={f}");
                assert!(2 * q > n + f, "n={n} f={f}");
            }
        }
    }
}
