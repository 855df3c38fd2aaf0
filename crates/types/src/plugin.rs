//! Data exchanged with the reporting plugin and the onchain side.
//!
//! The protocol treats queries, observations, outcomes and reports as opaque
//! byte strings. Report metadata is a type parameter `RI` chosen by the plugin
//! family, so the consensus core never depends on its shape.

use crate::{Epoch, OracleId, SeqNr};
use ocr3_crypto::Ed25519PublicKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque query produced by the leader's plugin.
pub type Query = Vec<u8>;
/// Opaque observation produced by a follower's plugin.
pub type Observation = Vec<u8>;
/// Opaque agreed-upon application state after a round.
pub type Outcome = Vec<u8>;
/// Opaque report destined for the external target.
pub type Report = Vec<u8>;
/// Onchain public key as understood by the onchain keyring.
pub type OnchainPublicKey = Vec<u8>;
/// Account used by the contract transmitter.
pub type Account = String;

/// Context handed to `Outcome`, `Query` and `Observation` plugin calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutcomeContext {
    /// Sequence number of the round being decided
    pub seq_nr: SeqNr,
    /// Outcome delivered for `seq_nr - 1` (empty at genesis)
    pub previous_outcome: Outcome,
    /// Current epoch
    pub epoch: Epoch,
    /// One-based round number within the epoch
    pub round: u64,
}

/// An observation together with the oracle that made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedObservation {
    /// The observation
    pub observation: Observation,
    /// Oracle that produced it
    pub observer: OracleId,
}

/// A report and its plugin-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWithInfo<RI> {
    /// The report bytes
    pub report: Report,
    /// Plugin-specific metadata
    pub info: RI,
}

/// Plugin-chosen transmission order overriding the default schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionSchedule {
    /// Oracles allowed to transmit, in no particular order
    pub transmitters: Vec<OracleId>,
    /// Delays assigned (after a keyed permutation) to `transmitters`
    pub transmission_delays: Vec<Duration>,
}

/// A report produced by `Reports`, optionally with its own schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPlus<RI> {
    /// The report and its metadata
    pub report_with_info: ReportWithInfo<RI>,
    /// Overrides the default stage-based schedule when present
    pub transmission_schedule_override: Option<TransmissionSchedule>,
}

impl<RI> ReportPlus<RI> {
    /// A report that uses the default transmission schedule.
    pub fn new(report: Report, info: RI) -> Self {
        Self {
            report_with_info: ReportWithInfo { report, info },
            transmission_schedule_override: None,
        }
    }
}

/// An onchain report signature attributed to its signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedOnchainSignature {
    /// Signature bytes
    pub signature: Vec<u8>,
    /// Oracle that produced it
    pub signer: OracleId,
}

/// A report with more than F valid onchain signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestedReportMany<RI> {
    /// The attested report
    pub report_with_info: ReportWithInfo<RI>,
    /// Signatures, ordered by signer
    pub attributed_signatures: Vec<AttributedOnchainSignature>,
}

/// Public identity of one oracle in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleIdentity {
    /// Key used for offchain protocol signatures
    pub offchain_public_key: Ed25519PublicKey,
    /// Key used to verify onchain report signatures
    #[serde(with = "hex_bytes")]
    pub onchain_public_key: OnchainPublicKey,
    /// Network peer identifier
    pub peer_id: String,
    /// Account the oracle transmits from
    pub transmit_account: Account,
}

/// Size limits the plugin promises to respect.
///
/// Messages from peers that exceed them are dropped before they reach any
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPluginLimits {
    /// Maximum query length in bytes
    pub max_query_length: usize,
    /// Maximum observation length in bytes
    pub max_observation_length: usize,
    /// Maximum outcome length in bytes
    pub max_outcome_length: usize,
    /// Maximum report length in bytes
    pub max_report_length: usize,
    /// Maximum number of reports per round
    pub max_report_count: usize,
}

impl Default for ReportingPluginLimits {
    fn default() -> Self {
        Self {
            max_query_length: 1024,
            max_observation_length: 1024,
            max_outcome_length: 4096,
            max_report_length: 4096,
            max_report_count: 16,
        }
    }
}

/// Static information about a plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPluginInfo {
    /// Human readable name, used in logs
    pub name: String,
    /// Size limits
    pub limits: ReportingPluginLimits,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
