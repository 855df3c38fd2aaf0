//! # Signed Protocol Data and Quorum Certificates
//!
//! Every offchain signature covers `"ocr3" ‖ SHA-256(domain ‖ fields)`, where
//! the fields always start with the [`Timestamp`] (config digest and epoch).
//! Integers are encoded big-endian, blobs are length-prefixed.
//!
//! Certificates bundle exactly a byzantine quorum of attributed signatures:
//!
//! - [`CertifiedPrepare`] - quorum of prepare signatures, not yet deliverable
//! - [`CertifiedCommit`] - quorum of commit signatures, safe to deliver
//! - [`EpochStartProof`] - quorum of signed highest-certified timestamps plus
//!   the certificate carrying the maximum timestamp
//!
//! Signing functions take the signer as a closure so this crate does not
//! depend on any keyring implementation.

use crate::{
    byzantine_quorum_size, AttributedObservation, ConfigDigest, Epoch, Observation, OracleId,
    OracleIdentity, Outcome, ReportingPluginLimits, SeqNr, Timestamp,
};
use ocr3_crypto::ed25519::SIGNATURE_LENGTH;
use ocr3_crypto::hash::{domain_separated_sum, Hasher};
use ocr3_crypto::{sha256, Ed25519PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

const SIGNED_OBSERVATION_DOMAIN: &[u8] = b"ocr3 SignedObservation";
const PREPARE_SIGNATURE_DOMAIN: &[u8] = b"ocr3 PrepareSignature";
const COMMIT_SIGNATURE_DOMAIN: &[u8] = b"ocr3 CommitSignature";
const SIGNED_HCT_DOMAIN: &[u8] = b"ocr3 SignedHighestCertifiedTimestamp";
const CERTIFIED_PREPARE_DIGEST_DOMAIN: &[u8] = b"ocr3 CertifiedPrepareDigest";
const CERTIFIED_COMMIT_DIGEST_DOMAIN: &[u8] = b"ocr3 CertifiedCommitDigest";

/// Errors produced when verifying signed data or certificates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// A single signature did not verify
    #[error("{0} has invalid signature")]
    BadSignature(&'static str),

    /// Certificate does not carry exactly a byzantine quorum of signatures
    #[error("wrong number of signatures: expected {expected} for byz. quorum, got {actual}")]
    WrongSignatureCount {
        /// Byzantine quorum size
        expected: usize,
        /// Signatures present
        actual: usize,
    },

    /// Two signatures by the same oracle
    #[error("duplicate signature by oracle {0}")]
    DuplicateSigner(OracleId),

    /// Signer index not in the oracle list
    #[error("signer out of bounds: {0}")]
    SignerOutOfBounds(OracleId),

    /// A quorum member's signature did not verify
    #[error("{index}-th signature by oracle {signer} does not verify")]
    InvalidSignature {
        /// Position in the certificate
        index: usize,
        /// Claimed signer
        signer: OracleId,
    },

    /// Highest certified timestamp does not match the maximum of the proof
    #[error("mismatch between timestamp of highest certified ({certified}) and the max from the proof ({maximum})")]
    TimestampMismatch {
        /// Timestamp of the carried certificate
        certified: HighestCertifiedTimestamp,
        /// Maximum timestamp in the proof
        maximum: HighestCertifiedTimestamp,
    },

    /// The carried certificate itself failed verification
    #[error("failed to verify highest certified: {0}")]
    InvalidHighestCertified(Box<CertificateError>),
}

/// Result type for certificate verification
pub type CertificateResult<T> = Result<T, CertificateError>;

/// Digest binding everything that went into an outcome.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutcomeInputsDigest(pub [u8; 32]);

/// SHA-256 of an outcome.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutcomeDigest(pub [u8; 32]);

impl fmt::Debug for OutcomeInputsDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutcomeInputsDigest({})", hex::encode(self.0))
    }
}

impl fmt::Debug for OutcomeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutcomeDigest({})", hex::encode(self.0))
    }
}

/// Digest identifying a certificate.
pub type CertifiedPrepareOrCommitDigest = [u8; 32];

fn timestamp_hasher(domain: &[u8], ts: &Timestamp) -> Hasher {
    let mut hasher = Hasher::with_domain(domain);
    hasher.update(ts.config_digest.as_bytes());
    hasher.update_u64(ts.epoch);
    hasher
}

/// Compute the digest of the inputs to `Outcome`.
pub fn make_outcome_inputs_digest(
    ts: &Timestamp,
    previous_outcome: &[u8],
    seq_nr: SeqNr,
    query: &[u8],
    attributed_observations: &[AttributedObservation],
) -> OutcomeInputsDigest {
    let mut hasher = Hasher::new();
    hasher.update(ts.config_digest.as_bytes());
    hasher.update_u64(ts.epoch);
    hasher.update_len_prefixed(previous_outcome);
    hasher.update_u64(seq_nr);
    hasher.update_len_prefixed(query);
    hasher.update_u64(attributed_observations.len() as u64);
    for ao in attributed_observations {
        hasher.update_len_prefixed(&ao.observation);
        hasher.update_u64(ao.observer as u64);
    }
    OutcomeInputsDigest(hasher.finalize())
}

/// Compute the digest of an outcome.
pub fn make_outcome_digest(outcome: &[u8]) -> OutcomeDigest {
    OutcomeDigest(sha256(outcome))
}

/// Checks shared by every quorum certificate: exact size, distinct and
/// in-range signers, and a valid signature from each.
fn verify_quorum<T>(
    entries: &[T],
    identities: &[OracleIdentity],
    byz_quorum_size: usize,
    signer_of: impl Fn(&T) -> OracleId,
    verify_one: impl Fn(&T, &Ed25519PublicKey) -> bool,
) -> CertificateResult<()> {
    if entries.len() != byz_quorum_size {
        return Err(CertificateError::WrongSignatureCount {
            expected: byz_quorum_size,
            actual: entries.len(),
        });
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let signer = signer_of(entry);
        if !seen.insert(signer) {
            return Err(CertificateError::DuplicateSigner(signer));
        }
        let identity = identities
            .get(signer as usize)
            .ok_or(CertificateError::SignerOutOfBounds(signer))?;
        if !verify_one(entry, &identity.offchain_public_key) {
            return Err(CertificateError::InvalidSignature { index, signer });
        }
    }
    Ok(())
}

// =============================================================================
// Observations
// =============================================================================

/// An observation signed by its observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedObservation {
    /// The observation
    pub observation: Observation,
    /// Offchain signature over the observation and the round's query
    pub signature: Vec<u8>,
}

impl SignedObservation {
    /// Sign an observation made for `query` in round `seq_nr`.
    pub fn make<E>(
        ts: &Timestamp,
        seq_nr: SeqNr,
        query: &[u8],
        observation: Observation,
        signer: impl FnOnce(&[u8]) -> Result<Vec<u8>, E>,
    ) -> Result<Self, E> {
        let signature = signer(&signed_observation_msg(ts, seq_nr, query, &observation))?;
        Ok(Self {
            observation,
            signature,
        })
    }

    /// Verify against the exact inputs used to produce the signature.
    pub fn verify(
        &self,
        ts: &Timestamp,
        seq_nr: SeqNr,
        query: &[u8],
        public_key: &Ed25519PublicKey,
    ) -> CertificateResult<()> {
        let msg = signed_observation_msg(ts, seq_nr, query, &self.observation);
        if public_key.verify(&msg, &self.signature) {
            Ok(())
        } else {
            Err(CertificateError::BadSignature("SignedObservation"))
        }
    }
}

fn signed_observation_msg(
    ts: &Timestamp,
    seq_nr: SeqNr,
    query: &[u8],
    observation: &[u8],
) -> Vec<u8> {
    let mut hasher = timestamp_hasher(SIGNED_OBSERVATION_DOMAIN, ts);
    hasher.update_u64(seq_nr);
    hasher.update_len_prefixed(query);
    hasher.update_len_prefixed(observation);
    domain_separated_sum(&hasher.finalize())
}

/// A signed observation attributed to its observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedSignedObservation {
    /// The signed observation
    pub signed_observation: SignedObservation,
    /// Oracle that made it
    pub observer: OracleId,
}

// =============================================================================
// Prepare and commit signatures
// =============================================================================

/// Signature over (seqNr, outcome inputs digest, outcome digest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareSignature(pub Vec<u8>);

impl PrepareSignature {
    /// Produce a prepare signature.
    pub fn make<E>(
        ts: &Timestamp,
        seq_nr: SeqNr,
        inputs_digest: &OutcomeInputsDigest,
        outcome_digest: &OutcomeDigest,
        signer: impl FnOnce(&[u8]) -> Result<Vec<u8>, E>,
    ) -> Result<Self, E> {
        signer(&prepare_signature_msg(ts, seq_nr, inputs_digest, outcome_digest)).map(Self)
    }

    /// Verify against the exact inputs used to produce the signature.
    pub fn verify(
        &self,
        ts: &Timestamp,
        seq_nr: SeqNr,
        inputs_digest: &OutcomeInputsDigest,
        outcome_digest: &OutcomeDigest,
        public_key: &Ed25519PublicKey,
    ) -> CertificateResult<()> {
        let msg = prepare_signature_msg(ts, seq_nr, inputs_digest, outcome_digest);
        if public_key.verify(&msg, &self.0) {
            Ok(())
        } else {
            Err(CertificateError::BadSignature("PrepareSignature"))
        }
    }
}

fn prepare_signature_msg(
    ts: &Timestamp,
    seq_nr: SeqNr,
    inputs_digest: &OutcomeInputsDigest,
    outcome_digest: &OutcomeDigest,
) -> Vec<u8> {
    let mut hasher = timestamp_hasher(PREPARE_SIGNATURE_DOMAIN, ts);
    hasher.update_u64(seq_nr);
    hasher.update(&inputs_digest.0);
    hasher.update(&outcome_digest.0);
    domain_separated_sum(&hasher.finalize())
}

/// A prepare signature attributed to its signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedPrepareSignature {
    /// The signature
    pub signature: PrepareSignature,
    /// Oracle that produced it
    pub signer: OracleId,
}

/// Signature over (seqNr, outcome digest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSignature(pub Vec<u8>);

impl CommitSignature {
    /// Produce a commit signature.
    pub fn make<E>(
        ts: &Timestamp,
        seq_nr: SeqNr,
        outcome_digest: &OutcomeDigest,
        signer: impl FnOnce(&[u8]) -> Result<Vec<u8>, E>,
    ) -> Result<Self, E> {
        signer(&commit_signature_msg(ts, seq_nr, outcome_digest)).map(Self)
    }

    /// Verify against the exact inputs used to produce the signature.
    pub fn verify(
        &self,
        ts: &Timestamp,
        seq_nr: SeqNr,
        outcome_digest: &OutcomeDigest,
        public_key: &Ed25519PublicKey,
    ) -> CertificateResult<()> {
        let msg = commit_signature_msg(ts, seq_nr, outcome_digest);
        if public_key.verify(&msg, &self.0) {
            Ok(())
        } else {
            Err(CertificateError::BadSignature("CommitSignature"))
        }
    }
}

fn commit_signature_msg(ts: &Timestamp, seq_nr: SeqNr, outcome_digest: &OutcomeDigest) -> Vec<u8> {
    let mut hasher = timestamp_hasher(COMMIT_SIGNATURE_DOMAIN, ts);
    hasher.update_u64(seq_nr);
    hasher.update(&outcome_digest.0);
    domain_separated_sum(&hasher.finalize())
}

/// A commit signature attributed to its signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedCommitSignature {
    /// The signature
    pub signature: CommitSignature,
    /// Oracle that produced it
    pub signer: OracleId,
}

// =============================================================================
// Highest certified timestamps
// =============================================================================

/// Position of a certificate in the total order used during reconciliation.
///
/// Ordered by sequence number, then commit over prepare, then epoch. The
/// derived `Ord` relies on this field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct HighestCertifiedTimestamp {
    /// Sequence number of the certificate
    pub seq_nr: SeqNr,
    /// True for a commit certificate, false for a prepare
    pub committed_else_prepared: bool,
    /// Epoch the certificate was produced in
    pub epoch: Epoch,
}

impl fmt::Display for HighestCertifiedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{seq_nr: {}, {}, epoch: {}}}",
            self.seq_nr,
            if self.committed_else_prepared {
                "committed"
            } else {
                "prepared"
            },
            self.epoch
        )
    }
}

/// A highest certified timestamp signed for the epoch it is reported in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHighestCertifiedTimestamp {
    /// The claimed timestamp
    pub highest_certified_timestamp: HighestCertifiedTimestamp,
    /// Offchain signature over the claim
    pub signature: Vec<u8>,
}

impl SignedHighestCertifiedTimestamp {
    /// Sign a timestamp claim for epoch `ts.epoch`.
    pub fn make<E>(
        ts: &Timestamp,
        highest_certified_timestamp: HighestCertifiedTimestamp,
        signer: impl FnOnce(&[u8]) -> Result<Vec<u8>, E>,
    ) -> Result<Self, E> {
        let signature = signer(&signed_hct_msg(ts, &highest_certified_timestamp))?;
        Ok(Self {
            highest_certified_timestamp,
            signature,
        })
    }

    /// Verify the claim.
    pub fn verify(&self, ts: &Timestamp, public_key: &Ed25519PublicKey) -> CertificateResult<()> {
        let msg = signed_hct_msg(ts, &self.highest_certified_timestamp);
        if public_key.verify(&msg, &self.signature) {
            Ok(())
        } else {
            Err(CertificateError::BadSignature("SignedHighestCertifiedTimestamp"))
        }
    }
}

fn signed_hct_msg(ts: &Timestamp, hct: &HighestCertifiedTimestamp) -> Vec<u8> {
    let mut hasher = timestamp_hasher(SIGNED_HCT_DOMAIN, ts);
    hasher.update_u64(hct.seq_nr);
    hasher.update_u8(u8::from(hct.committed_else_prepared));
    hasher.update_u64(hct.epoch);
    domain_separated_sum(&hasher.finalize())
}

/// A signed timestamp claim attributed to its signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedSignedHighestCertifiedTimestamp {
    /// The signed claim
    pub signed_highest_certified_timestamp: SignedHighestCertifiedTimestamp,
    /// Oracle that made it
    pub signer: OracleId,
}

// =============================================================================
// Certificates
// =============================================================================

/// An outcome with a byzantine quorum of prepare signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedPrepare {
    /// Epoch the prepare quorum was gathered in
    pub prepare_epoch: Epoch,
    /// Sequence number of the round
    pub seq_nr: SeqNr,
    /// Inputs digest signed by the quorum (zero for re-proposals)
    pub outcome_inputs_digest: OutcomeInputsDigest,
    /// The prepared outcome
    pub outcome: Outcome,
    /// Exactly a byzantine quorum of signatures
    pub prepare_quorum_certificate: Vec<AttributedPrepareSignature>,
}

impl CertifiedPrepare {
    /// Position of this certificate in the reconciliation order.
    pub fn timestamp(&self) -> HighestCertifiedTimestamp {
        HighestCertifiedTimestamp {
            seq_nr: self.seq_nr,
            committed_else_prepared: false,
            epoch: self.prepare_epoch,
        }
    }

    /// Verify the quorum certificate.
    pub fn verify(
        &self,
        config_digest: ConfigDigest,
        identities: &[OracleIdentity],
        byz_quorum_size: usize,
    ) -> CertificateResult<()> {
        let ts = Timestamp::new(config_digest, self.prepare_epoch);
        let outcome_digest = make_outcome_digest(&self.outcome);
        verify_quorum(
            &self.prepare_quorum_certificate,
            identities,
            byz_quorum_size,
            |aps| aps.signer,
            |aps, pk| {
                aps.signature
                    .verify(&ts, self.seq_nr, &self.outcome_inputs_digest, &outcome_digest, pk)
                    .is_ok()
            },
        )
    }

    /// Cheap structural size check performed before any signature work.
    pub fn check_size(&self, n: usize, f: usize, limits: &ReportingPluginLimits) -> bool {
        self.outcome.len() <= limits.max_outcome_length
            && self.prepare_quorum_certificate.len() == byzantine_quorum_size(n, f)
            && self
                .prepare_quorum_certificate
                .iter()
                .all(|aps| aps.signature.0.len() == SIGNATURE_LENGTH)
    }

    /// Domain-separated digest of the whole certificate.
    pub fn digest(&self) -> CertifiedPrepareOrCommitDigest {
        let mut hasher = Hasher::with_domain(CERTIFIED_PREPARE_DIGEST_DOMAIN);
        hasher.update_u64(self.prepare_epoch);
        hasher.update_u64(self.seq_nr);
        hasher.update(&self.outcome_inputs_digest.0);
        hasher.update_len_prefixed(&self.outcome);
        hasher.update_u64(self.prepare_quorum_certificate.len() as u64);
        for aps in &self.prepare_quorum_certificate {
            hasher.update_len_prefixed(&aps.signature.0);
            hasher.update_u64(aps.signer as u64);
        }
        hasher.finalize()
    }
}

/// An outcome with a byzantine quorum of commit signatures.
///
/// The default value is the genesis commit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CertifiedCommit {
    /// Epoch the commit quorum was gathered in
    pub commit_epoch: Epoch,
    /// Sequence number of the round
    pub seq_nr: SeqNr,
    /// The committed outcome
    pub outcome: Outcome,
    /// Exactly a byzantine quorum of signatures
    pub commit_quorum_certificate: Vec<AttributedCommitSignature>,
}

impl CertifiedCommit {
    /// The genesis commit: epoch 0, sequence number 0, empty outcome.
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Whether this is the genesis commit.
    pub fn is_genesis(&self) -> bool {
        self.commit_epoch == 0
            && self.seq_nr == 0
            && self.outcome.is_empty()
            && self.commit_quorum_certificate.is_empty()
    }

    /// Position of this certificate in the reconciliation order.
    pub fn timestamp(&self) -> HighestCertifiedTimestamp {
        HighestCertifiedTimestamp {
            seq_nr: self.seq_nr,
            committed_else_prepared: true,
            epoch: self.commit_epoch,
        }
    }

    /// Verify the quorum certificate. Genesis always verifies.
    pub fn verify(
        &self,
        config_digest: ConfigDigest,
        identities: &[OracleIdentity],
        byz_quorum_size: usize,
    ) -> CertificateResult<()> {
        if self.is_genesis() {
            return Ok(());
        }
        let ts = Timestamp::new(config_digest, self.commit_epoch);
        let outcome_digest = make_outcome_digest(&self.outcome);
        verify_quorum(
            &self.commit_quorum_certificate,
            identities,
            byz_quorum_size,
            |acs| acs.signer,
            |acs, pk| {
                acs.signature
                    .verify(&ts, self.seq_nr, &outcome_digest, pk)
                    .is_ok()
            },
        )
    }

    /// Cheap structural size check performed before any signature work.
    pub fn check_size(&self, n: usize, f: usize, limits: &ReportingPluginLimits) -> bool {
        if self.is_genesis() {
            return true;
        }
        self.outcome.len() <= limits.max_outcome_length
            && self.commit_quorum_certificate.len() == byzantine_quorum_size(n, f)
            && self
                .commit_quorum_certificate
                .iter()
                .all(|acs| acs.signature.0.len() == SIGNATURE_LENGTH)
    }

    /// Domain-separated digest of the whole certificate.
    pub fn digest(&self) -> CertifiedPrepareOrCommitDigest {
        let mut hasher = Hasher::with_domain(CERTIFIED_COMMIT_DIGEST_DOMAIN);
        hasher.update_u64(self.commit_epoch);
        hasher.update_u64(self.seq_nr);
        hasher.update_len_prefixed(&self.outcome);
        hasher.update_u64(self.commit_quorum_certificate.len() as u64);
        for acs in &self.commit_quorum_certificate {
            hasher.update_len_prefixed(&acs.signature.0);
            hasher.update_u64(acs.signer as u64);
        }
        hasher.finalize()
    }
}

/// Either kind of certificate. This is the unit of crash-recovery persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CertifiedPrepareOrCommit {
    /// A prepared, not yet deliverable outcome
    Prepare(CertifiedPrepare),
    /// A committed outcome
    Commit(CertifiedCommit),
}

impl Default for CertifiedPrepareOrCommit {
    fn default() -> Self {
        Self::genesis()
    }
}

impl CertifiedPrepareOrCommit {
    /// The genesis certificate.
    pub fn genesis() -> Self {
        Self::Commit(CertifiedCommit::genesis())
    }

    /// Epoch the certificate was produced in.
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::Prepare(cp) => cp.prepare_epoch,
            Self::Commit(cc) => cc.commit_epoch,
        }
    }

    /// Sequence number of the certified round.
    pub fn seq_nr(&self) -> SeqNr {
        match self {
            Self::Prepare(cp) => cp.seq_nr,
            Self::Commit(cc) => cc.seq_nr,
        }
    }

    /// Position in the reconciliation order.
    pub fn timestamp(&self) -> HighestCertifiedTimestamp {
        match self {
            Self::Prepare(cp) => cp.timestamp(),
            Self::Commit(cc) => cc.timestamp(),
        }
    }

    /// Whether this is the genesis commit.
    pub fn is_genesis(&self) -> bool {
        matches!(self, Self::Commit(cc) if cc.is_genesis())
    }

    /// Verify the contained quorum certificate.
    pub fn verify(
        &self,
        config_digest: ConfigDigest,
        identities: &[OracleIdentity],
        byz_quorum_size: usize,
    ) -> CertificateResult<()> {
        match self {
            Self::Prepare(cp) => cp.verify(config_digest, identities, byz_quorum_size),
            Self::Commit(cc) => cc.verify(config_digest, identities, byz_quorum_size),
        }
    }

    /// Cheap structural size check.
    pub fn check_size(&self, n: usize, f: usize, limits: &ReportingPluginLimits) -> bool {
        match self {
            Self::Prepare(cp) => cp.check_size(n, f, limits),
            Self::Commit(cc) => cc.check_size(n, f, limits),
        }
    }

    /// Domain-separated digest of the certificate.
    pub fn digest(&self) -> CertifiedPrepareOrCommitDigest {
        match self {
            Self::Prepare(cp) => cp.digest(),
            Self::Commit(cc) => cc.digest(),
        }
    }
}

// =============================================================================
// Epoch start proof
// =============================================================================

/// Proof that a leader started its epoch from the highest certificate known
/// to a byzantine quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStartProof {
    /// Certificate with the maximum timestamp in the proof
    pub highest_certified: CertifiedPrepareOrCommit,
    /// Exactly a byzantine quorum of signed timestamp claims
    pub highest_certified_proof: Vec<AttributedSignedHighestCertifiedTimestamp>,
}

impl EpochStartProof {
    /// Verify the proof for the epoch in `ts`.
    pub fn verify(
        &self,
        ts: &Timestamp,
        identities: &[OracleIdentity],
        byz_quorum_size: usize,
    ) -> CertificateResult<()> {
        verify_quorum(
            &self.highest_certified_proof,
            identities,
            byz_quorum_size,
            |ashct| ashct.signer,
            |ashct, pk| ashct.signed_highest_certified_timestamp.verify(ts, pk).is_ok(),
        )?;

        let maximum = self
            .highest_certified_proof
            .iter()
            .map(|ashct| ashct.signed_highest_certified_timestamp.highest_certified_timestamp)
            .max()
            .unwrap_or_default();

        let certified = self.highest_certified.timestamp();
        if certified != maximum {
            return Err(CertificateError::TimestampMismatch { certified, maximum });
        }

        self.highest_certified
            .verify(ts.config_digest, identities, byz_quorum_size)
            .map_err(|e| CertificateError::InvalidHighestCertified(Box::new(e)))
    }

    /// Cheap structural size check.
    pub fn check_size(&self, n: usize, f: usize, limits: &ReportingPluginLimits) -> bool {
        self.highest_certified.check_size(n, f, limits)
            && self.highest_certified_proof.len() == byzantine_quorum_size(n, f)
            && self.highest_certified_proof.iter().all(|ashct| {
                ashct.signed_highest_certified_timestamp.signature.len() == SIGNATURE_LENGTH
            })
    }
}
