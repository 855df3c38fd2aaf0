//! # OCR3 Core - Collaborator Abstractions
//!
//! This crate defines the interfaces between the OCR3 consensus protocol and
//! the world around it:
//!
//! - **Storage**: persisting the latest certificate across restarts
//! - **Transport**: sending protocol messages between oracles
//! - **Plugin**: application logic behind queries, observations and reports
//! - **Keyrings**: offchain (protocol) and onchain (report) signatures
//! - **Transmitter**: delivering attested reports
//!
//! It also ships the implementations needed to run oracles in one process:
//! Ed25519 and EVM keyrings, and a loopback [`LocalNetwork`].
//!
//! # Swappable Components
//!
//! | Component | Trait | Provided Impl |
//! |-----------|-------|---------------|
//! | Storage | `Database` | `ocr3-storage` memory and file databases |
//! | Network | `NetworkEndpoint` | `LocalNetwork` |
//! | Offchain signing | `OffchainKeyring` | `Ed25519OffchainKeyring` |
//! | Onchain signing | `OnchainKeyring` | `EvmOnchainKeyring` |
//!
//! # Example
//!
//! ```ignore
//! use ocr3_core::{LocalNetwork, NetworkEndpoint};
//!
//! let (network, mut endpoints) = LocalNetwork::new(4);
//! endpoints[0].sender().broadcast(msg);
//! let received = endpoints[1].receive().await;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod keyring;
pub mod network;
pub mod traits;

// Re-export commonly used types
pub use keyring::{Ed25519OffchainKeyring, EvmOnchainKeyring};
pub use network::{LocalEndpoint, LocalNetwork};
pub use traits::{
    // Transmission
    ContractTransmitter,
    // Storage
    Database, StorageError, StorageResult,
    // Keyrings
    KeyringError, KeyringResult, OffchainKeyring, OnchainKeyring,
    // Transport
    NetworkEndpoint, NetworkSender,
    // Plugin
    ReportingPlugin,
};
