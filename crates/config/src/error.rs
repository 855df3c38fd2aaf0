//! Errors raised while loading or checking node configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// No oracle identities configured
    #[error("No oracle identities configured: at least one oracle required")]
    NoOracles,

    /// More oracles than the protocol supports
    #[error("Too many oracles: n must be at most {max}, got {n}")]
    TooManyOracles { n: usize, max: usize },

    /// Fault tolerance violates 3f < n
    #[error("Invalid fault tolerance: f ({f}) must be less than n/3 (n = {n})")]
    InvalidFaultTolerance { n: usize, f: usize },

    /// A timer that must be non-zero is zero
    #[error("{name} must be positive, got {value}ms")]
    InvalidTimeout { name: &'static str, value: u64 },

    /// Round-level delta not smaller than the progress timeout
    #[error("Invalid timeout: {name} ({value}ms) must be less than delta_progress ({progress}ms)")]
    DeltaNotBelowProgress {
        name: &'static str,
        value: u64,
        progress: u64,
    },

    /// Duration outside its allowed range
    #[error("Invalid {name}: must be between {min}ms and {max}ms, got {value}ms")]
    DurationOutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Timer set below the resource exhaustion safe interval
    #[error("{name} ({value}ms) is set below the resource exhaustion safe interval ({min}ms)")]
    ResourceExhaustion {
        name: &'static str,
        value: u64,
        min: u64,
    },

    /// Invalid maximum number of rounds per epoch
    #[error("Invalid r_max: must be greater than zero")]
    InvalidRMax,

    /// Invalid transmission schedule
    #[error("Invalid transmission schedule: {0}")]
    InvalidSchedule(String),

    /// Two oracles share an identity component
    #[error("Duplicate oracle identity: {0}")]
    DuplicateIdentity(String),

    /// Our own key is not part of the configuration
    #[error("Oracle not found in configuration: {0}")]
    OracleNotFound(String),

    #[error("unknown log level {0:?}, expected one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("unknown log format {0:?}, expected one of text, json, compact")]
    InvalidLogFormat(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
