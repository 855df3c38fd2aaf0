//! # OCR3 Consensus
//!
//! The protocol state machines of one oracle. A committee of `n` oracles, up
//! to `f` of them Byzantine (`3f < n`), agrees on one outcome per sequence
//! number, turns each outcome into reports signed by at least `f + 1`
//! oracles, and hands the reports to a contract transmitter.
//!
//! ## Components
//!
//! - **Pacemaker**: epochs and leader election, view change on lack of progress
//! - **Report Generation**: leader-driven rounds (query, observations,
//!   outcome) with a two-phase prepare/commit certificate
//! - **Report Finalization**: onchain signatures over each outcome's reports
//!   and recovery of commits an oracle missed
//! - **Transmission**: staggered delivery of attested reports
//!
//! Each component is a single-owner event loop fed by bounded queues.
//! [`run_oracle`] wires them together and routes network traffic.
//!
//! ## Round Flow
//!
//! ```text
//! Pacemaker        StartNewEpoch(e), leader = prf(key, e) mod n
//!     │
//!     ▼
//! Report Generation
//!     Reconcile ──► EpochStart ──► RoundStart ──► Observation
//!         ──► Propose ──► Prepare (2f+1) ──► Commit (2f+1) ──► deliver
//!     │
//!     ▼
//! Report Finalization
//!     Reports ──► ReportSignatures ──► f+1 valid ──► AttestedReport
//!     │
//!     ▼
//! Transmission
//!     delay = stage(rank) × ΔStage ──► ShouldTransmit ──► transmit
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use ocr3_consensus::{run_oracle, OracleArgs};
//! use tokio_util::sync::CancellationToken;
//!
//! let args = OracleArgs {
//!     config,
//!     local_config,
//!     id,
//!     database,
//!     offchain_keyring,
//!     onchain_keyring,
//!     plugin,
//!     contract_transmitter,
//! };
//! let cancel = CancellationToken::new();
//! tokio::spawn(run_oracle(args, endpoint, cancel.clone()));
//! ```
//!
//! ## Safety Guarantees
//!
//! **Agreement**: No two honest oracles deliver different outcomes for the
//! same sequence number.
//!
//! **Monotonicity**: An oracle delivers sequence numbers in increasing order
//! and never twice, across restarts included.
//!
//! **Liveness**: Outcomes keep being delivered while more than `2f` oracles
//! are honest and connected and the leader is correct.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod events;
pub mod message_buffer;
pub mod oracle;
pub mod pacemaker;
pub mod plugin_caller;
pub mod pool;
pub mod report_finalization;
pub mod report_generation;
pub mod scheduler;
pub mod timeout;
pub mod transmission;

// Re-export main types at crate root for convenience
pub use events::{
    EventAttestedReport, EventToPacemaker, EventToReportFinalization, EventToReportGeneration,
};
pub use message_buffer::MessageBuffer;
pub use oracle::{run_oracle, try_until_success, OracleArgs, CHANNEL_CAPACITY, RESTORE_RETRY_PERIOD};
pub use pacemaker::{leader, Pacemaker, PacemakerChannels};
pub use plugin_caller::{
    call_plugin, Deadline, Watchdog, PLUGIN_WATCHDOG_GRACE, TRANSMITTER_WATCHDOG_GRACE,
};
pub use pool::{Pool, PoolEntry, PoolError};
pub use report_finalization::{
    ReportFinalization, ReportFinalizationChannels, ReportFinalizationDeps, RoundWindows,
};
pub use report_generation::{
    ReportGeneration, ReportGenerationChannels, ReportGenerationDeps, FUTURE_MESSAGE_BUFFER_SIZE,
    POOL_CAPACITY,
};
pub use scheduler::Scheduler;
pub use timeout::Timer;
pub use transmission::{
    transmit_delays_default, transmit_delays_from_override, transmit_permutation_key,
    ScheduleError, Transmission, TransmissionChannels, TransmissionDeps,
};
