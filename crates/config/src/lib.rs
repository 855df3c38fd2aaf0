//! # OCR3 Configuration
//!
//! Configuration types for OCR3 oracles.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ocr3_config::{NodeConfig, SharedConfig};
//! use std::path::Path;
//!
//! // Local settings from the node's TOML file
//! let node = NodeConfig::load(Path::new("oracle.toml"))?;
//! println!("Database timeout: {:?}", node.local.database_timeout());
//!
//! // Protocol settings agreed on by all oracles
//! let shared = SharedConfig::new(public_config, shared_secret)?;
//! let leader_key = shared.leader_selection_key();
//! ```
//!
//! ## Configuration Sections
//!
//! - `[local]` - Timeouts on local collaborators (database, transmitter)
//! - `[logging]` - Logging settings (level, format)

mod config;
mod error;

pub use config::*;
pub use error::*;
