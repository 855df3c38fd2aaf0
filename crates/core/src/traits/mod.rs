//! Collaborator traits for OCR3 oracles.
//!
//! The consensus protocol talks to everything outside itself through these
//! traits, so each collaborator can be swapped for a test double.
//!
//! # Architecture
//!
//! - **Storage**: crash-recovery persistence of the latest certificate
//! - **Transport**: unreliable point-to-point and broadcast messaging
//! - **Plugin**: application logic producing queries, observations, outcomes
//!   and reports
//! - **Keyring**: offchain and onchain signing
//! - **Transmitter**: delivery of attested reports
//!
//! # Usage
//!
//! ```ignore
//! use ocr3_core::traits::{Database, NetworkSender, ReportingPlugin};
//!
//! fn start<P, D>(plugin: Arc<P>, db: Arc<D>, net: Arc<dyn NetworkSender>)
//! where
//!     P: ReportingPlugin<()>,
//!     D: Database,
//! {
//!     // Implementation works with any backend
//! }
//! ```

mod keyring;
mod plugin;
mod storage;
mod transmitter;
mod transport;

pub use keyring::*;
pub use plugin::*;
pub use storage::*;
pub use transmitter::*;
pub use transport::*;
