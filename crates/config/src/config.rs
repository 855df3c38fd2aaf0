//! Oracle configuration.
//!
//! Three layers, mirroring where the values come from:
//!
//! - [`PublicConfig`] is agreed on by every oracle of one configuration
//!   (protocol timers, schedule, identities). Durations are stored in
//!   milliseconds and exposed as [`Duration`] through accessors.
//! - [`SharedConfig`] adds the shared secret, from which the leader selection
//!   and transmission order keys are derived.
//! - [`LocalConfig`] holds per-node knobs (timeouts on local collaborators),
//!   loaded together with [`LoggingConfig`] from one TOML file as a
//!   [`NodeConfig`].

use crate::error::{ConfigError, ConfigResult};
use ocr3_crypto::{prf, Ed25519PublicKey};
use ocr3_types::{
    byzantine_quorum_size, ConfigDigest, OracleId, OracleIdentity, MAX_ORACLES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Timers that would exhaust a node's resources below this interval.
pub const RESOURCE_EXHAUSTION_SAFE_INTERVAL_MS: u64 = 100;

/// Size in bytes of the shared secret.
pub const SHARED_SECRET_SIZE: usize = 16;

const LEADER_SELECTION_KEY_LABEL: &[u8] = b"chainlink offchain reporting v3 leader selection key";
const TRANSMISSION_ORDER_KEY_LABEL: &[u8] =
    b"chainlink offchain reporting v3 transmission order key";

// =============================================================================
// Public Configuration
// =============================================================================

/// Configuration shared verbatim by all oracles of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    /// Epoch without progress after which a new epoch is requested (milliseconds)
    pub delta_progress_ms: u64,

    /// Resend interval for pacemaker messages (milliseconds)
    pub delta_resend_ms: u64,

    /// Wait for the first leader message of an epoch (milliseconds)
    pub delta_initial_ms: u64,

    /// Minimum interval between round starts (milliseconds)
    pub delta_round_ms: u64,

    /// Wait for slow observers after a quorum of observations (milliseconds)
    pub delta_grace_ms: u64,

    /// Interval between certified commit requests (milliseconds)
    pub delta_certified_commit_request_ms: u64,

    /// Interval between transmission stages (milliseconds)
    pub delta_stage_ms: u64,

    /// Maximum number of rounds per epoch
    pub r_max: u64,

    /// Transmission schedule: number of oracles per stage
    pub s: Vec<usize>,

    /// Identities of all participating oracles, indexed by oracle id
    pub oracle_identities: Vec<OracleIdentity>,

    /// Opaque configuration passed to the reporting plugin
    #[serde(default, with = "hex_bytes")]
    pub reporting_plugin_config: Vec<u8>,

    /// Soft limit for `query` (milliseconds)
    pub max_duration_query_ms: u64,

    /// Soft limit for `observation` (milliseconds)
    pub max_duration_observation_ms: u64,

    /// Hard limit for `should_accept_finalized_report` (milliseconds)
    pub max_duration_should_accept_finalized_report_ms: u64,

    /// Hard limit for `should_transmit_accepted_report` (milliseconds)
    pub max_duration_should_transmit_accepted_report_ms: u64,

    /// Maximum number of faulty oracles
    pub f: usize,

    /// Opaque configuration also visible to the onchain side
    #[serde(default, with = "hex_bytes")]
    pub onchain_config: Vec<u8>,

    /// Digest identifying this configuration
    pub config_digest: ConfigDigest,
}

impl PublicConfig {
    /// Number of oracles.
    pub fn n(&self) -> usize {
        self.oracle_identities.len()
    }

    /// Byzantine quorum size for this configuration.
    pub fn byz_quorum_size(&self) -> usize {
        byzantine_quorum_size(self.n(), self.f)
    }

    /// The minimum interval between round starts under a correct leader.
    pub fn min_round_interval(&self) -> Duration {
        self.delta_round().max(self.delta_grace())
    }

    pub fn delta_progress(&self) -> Duration {
        Duration::from_millis(self.delta_progress_ms)
    }

    pub fn delta_resend(&self) -> Duration {
        Duration::from_millis(self.delta_resend_ms)
    }

    pub fn delta_initial(&self) -> Duration {
        Duration::from_millis(self.delta_initial_ms)
    }

    pub fn delta_round(&self) -> Duration {
        Duration::from_millis(self.delta_round_ms)
    }

    pub fn delta_grace(&self) -> Duration {
        Duration::from_millis(self.delta_grace_ms)
    }

    pub fn delta_certified_commit_request(&self) -> Duration {
        Duration::from_millis(self.delta_certified_commit_request_ms)
    }

    pub fn delta_stage(&self) -> Duration {
        Duration::from_millis(self.delta_stage_ms)
    }

    pub fn max_duration_query(&self) -> Duration {
        Duration::from_millis(self.max_duration_query_ms)
    }

    pub fn max_duration_observation(&self) -> Duration {
        Duration::from_millis(self.max_duration_observation_ms)
    }

    pub fn max_duration_should_accept_finalized_report(&self) -> Duration {
        Duration::from_millis(self.max_duration_should_accept_finalized_report_ms)
    }

    pub fn max_duration_should_transmit_accepted_report(&self) -> Duration {
        Duration::from_millis(self.max_duration_should_transmit_accepted_report_ms)
    }

    /// Validate the fundamental protocol constraints.
    ///
    /// Catches violations of `3f < n`, impossible timer relations and simple
    /// mistakes in the schedule or identity list.
    pub fn validate(&self) -> ConfigResult<()> {
        let n = self.n();
        if n == 0 {
            return Err(ConfigError::NoOracles);
        }
        if n > MAX_ORACLES {
            return Err(ConfigError::TooManyOracles {
                n,
                max: MAX_ORACLES,
            });
        }
        if 3 * self.f >= n {
            return Err(ConfigError::InvalidFaultTolerance { n, f: self.f });
        }

        let positive = [
            ("delta_progress", self.delta_progress_ms),
            ("delta_resend", self.delta_resend_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidTimeout { name, value });
            }
        }

        for (name, value) in [
            ("delta_round", self.delta_round_ms),
            ("delta_grace", self.delta_grace_ms),
        ] {
            if value >= self.delta_progress_ms {
                return Err(ConfigError::DeltaNotBelowProgress {
                    name,
                    value,
                    progress: self.delta_progress_ms,
                });
            }
        }

        if self.r_max == 0 {
            return Err(ConfigError::InvalidRMax);
        }

        if self.s.len() >= 1000 {
            return Err(ConfigError::InvalidSchedule(format!(
                "len(s) ({}) must be less than 1000",
                self.s.len()
            )));
        }
        for (i, stage) in self.s.iter().enumerate() {
            if *stage > MAX_ORACLES {
                return Err(ConfigError::InvalidSchedule(format!(
                    "s[{i}] ({stage}) must be at most {MAX_ORACLES}"
                )));
            }
        }
        if self.s.iter().sum::<usize>() == 0 {
            return Err(ConfigError::InvalidSchedule(
                "no oracle would ever transmit".to_string(),
            ));
        }

        self.check_identities_unique()
    }

    /// Reject timers so short they would flood the network.
    ///
    /// Skipped in development mode.
    pub fn check_resource_exhaustion(&self) -> ConfigResult<()> {
        let min = RESOURCE_EXHAUSTION_SAFE_INTERVAL_MS;
        for (name, value) in [
            ("delta_progress", self.delta_progress_ms),
            ("delta_resend", self.delta_resend_ms),
            ("delta_initial", self.delta_initial_ms),
            (
                "delta_certified_commit_request",
                self.delta_certified_commit_request_ms,
            ),
        ] {
            if value < min {
                return Err(ConfigError::ResourceExhaustion { name, value, min });
            }
        }
        Ok(())
    }

    fn check_identities_unique(&self) -> ConfigResult<()> {
        let mut offchain = HashSet::new();
        let mut onchain = HashSet::new();
        let mut peers = HashSet::new();
        let mut transmitters = HashSet::new();
        for identity in &self.oracle_identities {
            if !offchain.insert(identity.offchain_public_key) {
                return Err(ConfigError::DuplicateIdentity(format!(
                    "offchain public key {}",
                    identity.offchain_public_key.to_hex()
                )));
            }
            if !onchain.insert(identity.onchain_public_key.as_slice()) {
                return Err(ConfigError::DuplicateIdentity(format!(
                    "onchain public key {}",
                    hex::encode(&identity.onchain_public_key)
                )));
            }
            if !peers.insert(identity.peer_id.as_str()) {
                return Err(ConfigError::DuplicateIdentity(format!(
                    "peer id {}",
                    identity.peer_id
                )));
            }
            if !transmitters.insert(identity.transmit_account.as_str()) {
                return Err(ConfigError::DuplicateIdentity(format!(
                    "transmit account {}",
                    identity.transmit_account
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Shared Configuration
// =============================================================================

/// Public configuration plus the secret only oracles know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedConfig {
    /// The public part
    pub public: PublicConfig,

    /// Secret shared among the oracles of this configuration
    pub shared_secret: [u8; SHARED_SECRET_SIZE],
}

impl SharedConfig {
    /// Combine a validated public config with the shared secret.
    pub fn new(public: PublicConfig, shared_secret: [u8; SHARED_SECRET_SIZE]) -> ConfigResult<Self> {
        public.validate()?;
        Ok(Self {
            public,
            shared_secret,
        })
    }

    /// Key of the pseudo-random leader election.
    pub fn leader_selection_key(&self) -> [u8; 16] {
        self.derive_key(LEADER_SELECTION_KEY_LABEL)
    }

    /// Key of the pseudo-random transmission order.
    pub fn transmission_order_key(&self) -> [u8; 16] {
        self.derive_key(TRANSMISSION_ORDER_KEY_LABEL)
    }

    fn derive_key(&self, label: &[u8]) -> [u8; 16] {
        let mac = prf(
            &self.shared_secret,
            &[label, self.public.config_digest.as_bytes()],
        );
        let mut key = [0u8; 16];
        key.copy_from_slice(&mac[..16]);
        key
    }

    /// Find our oracle id by offchain public key.
    pub fn oracle_id(&self, offchain_public_key: &Ed25519PublicKey) -> ConfigResult<OracleId> {
        self.public
            .oracle_identities
            .iter()
            .position(|identity| identity.offchain_public_key == *offchain_public_key)
            .map(|i| i as OracleId)
            .ok_or_else(|| ConfigError::OracleNotFound(offchain_public_key.to_hex()))
    }
}

// =============================================================================
// Local Configuration
// =============================================================================

/// Per-node settings that do not need to agree across oracles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Timeout for each database operation (milliseconds)
    #[serde(default = "default_database_timeout")]
    pub database_timeout_ms: u64,

    /// Timeout for `ContractTransmitter::transmit` (milliseconds)
    #[serde(default = "default_transmit_timeout")]
    pub contract_transmitter_transmit_timeout_ms: u64,

    /// Skip bounds checks meant for production deployments
    #[serde(default)]
    pub dev_mode_skip_resource_checks: bool,
}

fn default_database_timeout() -> u64 {
    10_000
}

fn default_transmit_timeout() -> u64 {
    10_000
}

impl LocalConfig {
    pub fn database_timeout(&self) -> Duration {
        Duration::from_millis(self.database_timeout_ms)
    }

    pub fn contract_transmitter_transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.contract_transmitter_transmit_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.dev_mode_skip_resource_checks {
            return Ok(());
        }
        bound_ms(
            "database_timeout",
            self.database_timeout_ms,
            100,
            10_000,
        )?;
        bound_ms(
            "contract_transmitter_transmit_timeout",
            self.contract_transmitter_transmit_timeout_ms,
            1_000,
            60_000,
        )?;
        Ok(())
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            database_timeout_ms: default_database_timeout(),
            contract_transmitter_transmit_timeout_ms: default_transmit_timeout(),
            dev_mode_skip_resource_checks: false,
        }
    }
}

fn bound_ms(name: &'static str, value: u64, min: u64, max: u64) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::DurationOutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json, compact)
    pub format: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["text", "json", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// =============================================================================
// Node Configuration File
// =============================================================================

/// Everything a node reads from its configuration file.
///
/// ```toml
/// [local]
/// database_timeout_ms = 5000
///
/// [logging]
/// level = "debug"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local oracle settings
    #[serde(default)]
    pub local: LocalConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// The parsed and validated configuration, or an error if loading fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: NodeConfig = toml::from_str(&content)?;

        debug!("Configuration parsed successfully, validating...");
        config.validate()?;

        info!(
            "Configuration loaded: database_timeout={}ms, log_level={}",
            config.local.database_timeout_ms, config.logging.level
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.local.validate()?;
        self.logging.validate()?;
        Ok(())
    }
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
