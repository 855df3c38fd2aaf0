//! # Protocol Messages
//!
//! Messages exchanged between oracles, grouped by the component that consumes
//! them. The grouping is the routing table: the orchestrator matches on the
//! outer [`Message`] variant and forwards the inner value to the matching
//! component's queue.
//!
//! ```text
//! Message
//! ├── Pacemaker          NewEpochWish
//! ├── ReportGeneration   Reconcile, EpochStart, RoundStart, Observation,
//! │                      Propose, Prepare, Commit
//! └── ReportFinalization ReportSignatures, CertifiedCommitRequest,
//!                        SupplyCertifiedCommit
//! ```
//!
//! Serialization is left to the transport. The types derive serde so any
//! self-describing format works.

use crate::signed_data::{
    AttributedSignedObservation, CertifiedCommit, CertifiedPrepareOrCommit, CommitSignature,
    EpochStartProof, PrepareSignature, SignedHighestCertifiedTimestamp, SignedObservation,
};
use crate::{Epoch, OracleId, Query, ReportingPluginLimits, SeqNr};
use ocr3_crypto::ed25519::SIGNATURE_LENGTH;
use serde::{Deserialize, Serialize};

/// Messages consumed by the pacemaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageToPacemaker {
    /// The sender wishes to move to `epoch`
    NewEpochWish {
        /// Wished-for epoch
        epoch: Epoch,
    },
}

/// Messages consumed by report generation. All of them are epoch-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageToReportGeneration {
    /// Follower to leader: my highest certificate, signed for this epoch
    Reconcile {
        /// Epoch being started
        epoch: Epoch,
        /// Sender's highest certificate
        highest_certified: CertifiedPrepareOrCommit,
        /// Sender's signed claim of that certificate's timestamp
        signed_highest_certified_timestamp: SignedHighestCertifiedTimestamp,
    },
    /// Leader to all: the epoch starts from this proof
    EpochStart {
        /// Epoch being started
        epoch: Epoch,
        /// Proof assembled from a quorum of reconcile messages
        epoch_start_proof: EpochStartProof,
    },
    /// Leader to all: request observations for `seq_nr`
    RoundStart {
        /// Current epoch
        epoch: Epoch,
        /// Round sequence number
        seq_nr: SeqNr,
        /// Query from the leader's plugin
        query: Query,
    },
    /// Follower to leader: my signed observation
    Observation {
        /// Current epoch
        epoch: Epoch,
        /// Round sequence number
        seq_nr: SeqNr,
        /// The observation
        signed_observation: SignedObservation,
    },
    /// Leader to all: the observations to compute the outcome from
    Propose {
        /// Current epoch
        epoch: Epoch,
        /// Round sequence number
        seq_nr: SeqNr,
        /// At least 2f+1 attributed signed observations
        attributed_signed_observations: Vec<AttributedSignedObservation>,
    },
    /// All to all: prepare vote
    Prepare {
        /// Current epoch
        epoch: Epoch,
        /// Round sequence number
        seq_nr: SeqNr,
        /// Prepare signature
        signature: PrepareSignature,
    },
    /// All to all: commit vote
    Commit {
        /// Current epoch
        epoch: Epoch,
        /// Round sequence number
        seq_nr: SeqNr,
        /// Commit signature
        signature: CommitSignature,
    },
}

impl MessageToReportGeneration {
    /// Epoch the message belongs to.
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::Reconcile { epoch, .. }
            | Self::EpochStart { epoch, .. }
            | Self::RoundStart { epoch, .. }
            | Self::Observation { epoch, .. }
            | Self::Propose { epoch, .. }
            | Self::Prepare { epoch, .. }
            | Self::Commit { epoch, .. } => *epoch,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reconcile { .. } => "Reconcile",
            Self::EpochStart { .. } => "EpochStart",
            Self::RoundStart { .. } => "RoundStart",
            Self::Observation { .. } => "Observation",
            Self::Propose { .. } => "Propose",
            Self::Prepare { .. } => "Prepare",
            Self::Commit { .. } => "Commit",
        }
    }
}

/// Messages consumed by report finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageToReportFinalization {
    /// The sender's onchain signatures over every report of `seq_nr`
    ReportSignatures {
        /// Round sequence number
        seq_nr: SeqNr,
        /// One signature per report, in report order
        report_signatures: Vec<Vec<u8>>,
    },
    /// Please send me the certified commit for `seq_nr`
    CertifiedCommitRequest {
        /// Round sequence number
        seq_nr: SeqNr,
    },
    /// Response to a certified commit request
    SupplyCertifiedCommit {
        /// The requested commit
        certified_commit: CertifiedCommit,
    },
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Routed to the pacemaker
    Pacemaker(MessageToPacemaker),
    /// Routed to report generation
    ReportGeneration(MessageToReportGeneration),
    /// Routed to report finalization
    ReportFinalization(MessageToReportFinalization),
}

impl From<MessageToPacemaker> for Message {
    fn from(msg: MessageToPacemaker) -> Self {
        Message::Pacemaker(msg)
    }
}

impl From<MessageToReportGeneration> for Message {
    fn from(msg: MessageToReportGeneration) -> Self {
        Message::ReportGeneration(msg)
    }
}

impl From<MessageToReportFinalization> for Message {
    fn from(msg: MessageToReportFinalization) -> Self {
        Message::ReportFinalization(msg)
    }
}

impl Message {
    /// Structural size check against the plugin limits and quorum sizes.
    ///
    /// Runs before any signature verification so oversized or malformed
    /// messages never reach a state machine.
    pub fn check_size(
        &self,
        n: usize,
        f: usize,
        limits: &ReportingPluginLimits,
        max_report_signature_length: usize,
    ) -> bool {
        match self {
            Message::Pacemaker(MessageToPacemaker::NewEpochWish { .. }) => true,
            Message::ReportGeneration(msg) => match msg {
                MessageToReportGeneration::Reconcile {
                    highest_certified,
                    signed_highest_certified_timestamp,
                    ..
                } => {
                    highest_certified.check_size(n, f, limits)
                        && signed_highest_certified_timestamp.signature.len() == SIGNATURE_LENGTH
                }
                MessageToReportGeneration::EpochStart {
                    epoch_start_proof, ..
                } => epoch_start_proof.check_size(n, f, limits),
                MessageToReportGeneration::RoundStart { query, .. } => {
                    query.len() <= limits.max_query_length
                }
                MessageToReportGeneration::Observation {
                    signed_observation, ..
                } => {
                    signed_observation.observation.len() <= limits.max_observation_length
                        && signed_observation.signature.len() == SIGNATURE_LENGTH
                }
                MessageToReportGeneration::Propose {
                    attributed_signed_observations,
                    ..
                } => {
                    attributed_signed_observations.len() <= n
                        && attributed_signed_observations.iter().all(|aso| {
                            aso.signed_observation.observation.len()
                                <= limits.max_observation_length
                                && aso.signed_observation.signature.len() == SIGNATURE_LENGTH
                        })
                }
                MessageToReportGeneration::Prepare { signature, .. } => {
                    signature.0.len() == SIGNATURE_LENGTH
                }
                MessageToReportGeneration::Commit { signature, .. } => {
                    signature.0.len() == SIGNATURE_LENGTH
                }
            },
            Message::ReportFinalization(msg) => match msg {
                MessageToReportFinalization::ReportSignatures {
                    report_signatures, ..
                } => {
                    report_signatures.len() <= limits.max_report_count
                        && report_signatures
                            .iter()
                            .all(|sig| sig.len() <= max_report_signature_length)
                }
                MessageToReportFinalization::CertifiedCommitRequest { .. } => true,
                MessageToReportFinalization::SupplyCertifiedCommit { certified_commit } => {
                    certified_commit.check_size(n, f, limits)
                }
            },
        }
    }
}

/// A message paired with the oracle that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWithSender<M = Message> {
    /// The message
    pub msg: M,
    /// Sender oracle
    pub sender: OracleId,
}

impl<M> MessageWithSender<M> {
    /// Pair a message with its sender.
    pub fn new(msg: M, sender: OracleId) -> Self {
        Self { msg, sender }
    }
}
