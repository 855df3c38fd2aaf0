//! # OCR3 Node
//!
//! A local simulator for the OCR3 protocol: every oracle of a committee runs
//! in one process, connected through an in-memory network, agreeing on a
//! counter and transmitting it to a simulated contract.
//!
//! ## Components
//!
//! - [`Cluster`] - starts, crashes and restarts oracles
//! - [`CounterPlugin`] - reporting plugin agreeing on an incrementing counter
//! - [`LoggingTransmitter`] - transmits to a shared [`Contract`] ledger
//!
//! ## Example
//!
//! ```rust,no_run
//! use ocr3_node::{Cluster, ClusterSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cluster = Cluster::start(ClusterSettings::default())?;
//!     cluster.wait_for_transmission(5, Duration::from_secs(60)).await;
//!     cluster.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod cluster;
pub mod plugin;
pub mod transmitter;

// Re-export main types at crate root
pub use cluster::{simulation_config, Cluster, ClusterSettings, GatedEndpoint, OracleKeys};
pub use plugin::{decode_counter, encode_counter, CounterError, CounterPlugin, DeliveryLog};
pub use transmitter::{Contract, LoggingTransmitter, Transmitted};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
