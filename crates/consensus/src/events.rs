//! Events exchanged between the protocol components of one oracle.
//!
//! Network messages live in `ocr3_types::message`; the types here never
//! leave the process.
//!
//! ```text
//!              ┌───────── StartNewEpoch ─────────┐
//!              │                                 ▼
//!        ┌─────┴─────┐                    ┌──────────────┐
//!        │ Pacemaker │◄── Progress ───────┤   Report     │
//!        │           │◄── ChangeLeader ───┤  Generation  │
//!        └───────────┘                    └──────┬───────┘
//!                                                │ CommittedOutcome
//!                                                ▼
//!                                         ┌──────────────┐
//!                                         │    Report    │
//!                                         │ Finalization │
//!                                         └──────┬───────┘
//!                                                │ AttestedReport
//!                                                ▼
//!                                         ┌──────────────┐
//!                                         │ Transmission │
//!                                         └──────────────┘
//! ```

use ocr3_types::{AttestedReportMany, CertifiedCommit, Epoch, SeqNr, TransmissionSchedule};

/// Report Generation → Pacemaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventToPacemaker {
    /// A round committed; the leader is doing its job
    Progress,
    /// The epoch ran out of rounds; elect a new leader
    ChangeLeader,
}

/// Pacemaker → Report Generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventToReportGeneration {
    /// Abandon the current epoch and start `epoch`
    StartNewEpoch {
        /// The epoch to start
        epoch: Epoch,
    },
}

/// Report Generation → Report Finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventToReportFinalization {
    /// An outcome was delivered with a verified commit certificate
    CommittedOutcome {
        /// The certificate of the delivered outcome
        certified_commit: CertifiedCommit,
    },
}

/// Report Finalization → Transmission: one attested report ready to be
/// scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttestedReport<RI> {
    /// Sequence number of the outcome the report came from
    pub seq_nr: SeqNr,
    /// Position of the report among the outcome's reports
    pub index: usize,
    /// The report with at least F+1 onchain signatures
    pub attested_report: AttestedReportMany<RI>,
    /// Plugin-chosen transmission schedule, if any
    pub transmission_schedule_override: Option<TransmissionSchedule>,
}
