//! In-process oracle cluster.
//!
//! Runs every oracle of one configuration inside the current tokio runtime,
//! connected through a [`LocalNetwork`]. Each oracle keeps its database and
//! delivery log across crashes, so a restarted oracle resumes from what it
//! persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use ocr3_config::{LocalConfig, PublicConfig, SharedConfig};
use ocr3_consensus::{leader, run_oracle, OracleArgs};
use ocr3_core::{
    Database, Ed25519OffchainKeyring, EvmOnchainKeyring, LocalEndpoint, LocalNetwork,
    NetworkEndpoint, NetworkSender, OffchainKeyring,
};
use ocr3_crypto::{Ed25519PrivateKey, PrivateKey};
use ocr3_storage::MemoryDatabase;
use ocr3_types::{
    ConfigDigest, Epoch, Message, MessageWithSender, OracleId, OracleIdentity, SeqNr,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::plugin::{CounterPlugin, DeliveryLog};
use crate::transmitter::{Contract, LoggingTransmitter};

/// How often [`Cluster::wait_until`] re-checks its condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shape and timing of a simulated cluster.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Number of oracles
    pub oracles: usize,
    /// Byzantine fault tolerance
    pub f: usize,
    /// Transmission stages
    pub s: Vec<usize>,
    /// Delay between transmission stages
    pub delta_stage: Duration,
    /// Rounds per epoch before the leader changes
    pub r_max: u64,
    /// Settings shared by all oracles' local configuration
    pub local: LocalConfig,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            oracles: 4,
            f: 1,
            s: vec![1, 1, 2],
            delta_stage: Duration::from_secs(1),
            r_max: 20,
            local: LocalConfig::default(),
        }
    }
}

/// Key material of one simulated oracle, derived from its index.
pub struct OracleKeys {
    /// Protocol signing key
    pub offchain: Arc<Ed25519OffchainKeyring>,
    /// Report signing key
    pub onchain: Arc<EvmOnchainKeyring>,
}

impl OracleKeys {
    /// Deterministic keys for oracle `id`.
    pub fn for_oracle(id: OracleId) -> Result<Self> {
        let offchain = Ed25519OffchainKeyring::new(Ed25519PrivateKey::from_bytes(&[id + 1; 32]));
        let onchain_key = PrivateKey::from_bytes(&[id + 101; 32])
            .with_context(|| format!("deriving onchain key of oracle {id}"))?;
        Ok(Self {
            offchain: Arc::new(offchain),
            onchain: Arc::new(EvmOnchainKeyring::new(onchain_key)),
        })
    }

    /// Public identity registered in the configuration.
    pub fn identity(&self, id: OracleId) -> OracleIdentity {
        OracleIdentity {
            offchain_public_key: self.offchain.offchain_public_key(),
            onchain_public_key: self.onchain.address().to_vec(),
            peer_id: format!("oracle-{id}"),
            transmit_account: format!("0x{id:040x}"),
        }
    }
}

/// Public configuration of a simulated cluster.
pub fn simulation_config(settings: &ClusterSettings, identities: Vec<OracleIdentity>) -> PublicConfig {
    PublicConfig {
        delta_progress_ms: 4_000,
        delta_resend_ms: 2_000,
        delta_initial_ms: 1_000,
        delta_round_ms: 500,
        delta_grace_ms: 100,
        delta_certified_commit_request_ms: 200,
        delta_stage_ms: settings.delta_stage.as_millis() as u64,
        r_max: settings.r_max,
        s: settings.s.clone(),
        oracle_identities: identities,
        reporting_plugin_config: Vec::new(),
        max_duration_query_ms: 200,
        max_duration_observation_ms: 200,
        max_duration_should_accept_finalized_report_ms: 200,
        max_duration_should_transmit_accepted_report_ms: 200,
        f: settings.f,
        onchain_config: Vec::new(),
        config_digest: ConfigDigest::new([0x0c; 32]),
    }
}

/// Endpoint that can be told to ignore report generation traffic.
///
/// An oracle behind a deaf endpoint never takes part in rounds and only
/// learns outcomes through report finalization.
pub struct GatedEndpoint {
    inner: LocalEndpoint,
    deaf_to_report_generation: Arc<AtomicBool>,
}

#[async_trait]
impl NetworkEndpoint for GatedEndpoint {
    fn sender(&self) -> Arc<dyn NetworkSender> {
        self.inner.sender()
    }

    async fn receive(&mut self) -> Option<MessageWithSender> {
        loop {
            let received = self.inner.receive().await?;
            if matches!(received.msg, Message::ReportGeneration(_))
                && self.deaf_to_report_generation.load(Ordering::Relaxed)
            {
                trace!(oracle_id = self.inner.id(), sender = received.sender, "Ignoring report generation message");
                continue;
            }
            return Some(received);
        }
    }
}

struct RunningOracle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ClusterNode {
    keys: OracleKeys,
    database: Arc<MemoryDatabase>,
    deliveries: Arc<DeliveryLog>,
    deaf: Arc<AtomicBool>,
    running: Option<RunningOracle>,
}

/// A running cluster of oracles sharing one [`Contract`].
pub struct Cluster {
    config: Arc<SharedConfig>,
    local_config: LocalConfig,
    network: LocalNetwork,
    contract: Arc<Contract>,
    nodes: Vec<ClusterNode>,
}

impl Cluster {
    /// Build the configuration and start every oracle.
    pub fn start(settings: ClusterSettings) -> Result<Self> {
        ensure!(settings.oracles > 0, "a cluster needs at least one oracle");
        ensure!(
            settings.oracles <= ocr3_types::MAX_ORACLES,
            "at most {} oracles are supported",
            ocr3_types::MAX_ORACLES
        );

        let mut nodes = Vec::with_capacity(settings.oracles);
        let mut identities = Vec::with_capacity(settings.oracles);
        for id in 0..settings.oracles as OracleId {
            let keys = OracleKeys::for_oracle(id)?;
            identities.push(keys.identity(id));
            nodes.push(ClusterNode {
                keys,
                database: Arc::new(MemoryDatabase::new()),
                deliveries: Arc::new(DeliveryLog::new()),
                deaf: Arc::new(AtomicBool::new(false)),
                running: None,
            });
        }

        let public = simulation_config(&settings, identities);
        let config = Arc::new(
            SharedConfig::new(public, [0x5a; 16]).context("building cluster configuration")?,
        );
        let (network, endpoints) = LocalNetwork::new(settings.oracles);

        let mut cluster = Self {
            config,
            local_config: settings.local,
            network,
            contract: Arc::new(Contract::with_fault_tolerance(settings.f)),
            nodes,
        };
        for endpoint in endpoints {
            cluster.spawn(endpoint);
        }

        info!(
            oracles = settings.oracles,
            f = settings.f,
            config_digest = %cluster.config.public.config_digest,
            "Cluster started"
        );
        Ok(cluster)
    }

    fn spawn(&mut self, endpoint: LocalEndpoint) {
        let id = endpoint.id();
        let Some(node) = self.nodes.get_mut(id as usize) else {
            return;
        };

        let args = OracleArgs {
            config: self.config.clone(),
            local_config: self.local_config.clone(),
            id,
            database: node.database.clone(),
            offchain_keyring: node.keys.offchain.clone(),
            onchain_keyring: node.keys.onchain.clone(),
            plugin: Arc::new(CounterPlugin::new(
                id,
                self.contract.clone(),
                node.deliveries.clone(),
            )),
            contract_transmitter: Arc::new(LoggingTransmitter::new(id, self.contract.clone())),
        };
        let endpoint = GatedEndpoint {
            inner: endpoint,
            deaf_to_report_generation: node.deaf.clone(),
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_oracle(args, endpoint, cancel.clone()));
        node.running = Some(RunningOracle { cancel, handle });
    }

    /// Shared configuration of the cluster.
    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.config
    }

    /// Number of oracles.
    pub fn n(&self) -> usize {
        self.nodes.len()
    }

    /// The network connecting the oracles.
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// The contract every oracle transmits to.
    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    /// Leader of `epoch` in this configuration.
    pub fn leader_of(&self, epoch: Epoch) -> OracleId {
        leader(epoch, self.n(), &self.config.leader_selection_key())
    }

    /// Sequence numbers oracle `id` computed reports for, across restarts.
    pub fn deliveries(&self, id: OracleId) -> Vec<SeqNr> {
        self.nodes
            .get(id as usize)
            .map(|node| node.deliveries.seq_nrs())
            .unwrap_or_default()
    }

    /// Highest sequence number oracle `id` computed reports for.
    pub fn highest_delivered(&self, id: OracleId) -> SeqNr {
        self.nodes
            .get(id as usize)
            .map(|node| node.deliveries.highest())
            .unwrap_or(0)
    }

    /// Database of oracle `id`.
    pub fn database(&self, id: OracleId) -> Option<Arc<MemoryDatabase>> {
        self.nodes.get(id as usize).map(|node| node.database.clone())
    }

    /// Epoch of the certificate oracle `id` last persisted.
    pub async fn persisted_epoch(&self, id: OracleId) -> Option<Epoch> {
        let database = self.database(id)?;
        match database.read_cert(self.config.public.config_digest).await {
            Ok(cert) => cert.map(|cert| cert.epoch()),
            Err(e) => {
                error!(oracle_id = id, error = %e, "Reading persisted certificate failed");
                None
            }
        }
    }

    /// Whether oracle `id` is running.
    pub fn is_running(&self, id: OracleId) -> bool {
        self.nodes
            .get(id as usize)
            .is_some_and(|node| node.running.is_some())
    }

    /// Make oracle `id` ignore (or hear again) report generation traffic.
    pub fn set_deaf_to_report_generation(&self, id: OracleId, deaf: bool) {
        if let Some(node) = self.nodes.get(id as usize) {
            node.deaf.store(deaf, Ordering::Relaxed);
        }
    }

    /// Stop oracle `id` and cut it off the network.
    pub async fn crash(&mut self, id: OracleId) {
        let Some(running) = self
            .nodes
            .get_mut(id as usize)
            .and_then(|node| node.running.take())
        else {
            return;
        };

        info!(oracle_id = id, "Crashing oracle");
        self.network.isolate(id, true);
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!(oracle_id = id, error = %e, "Oracle task failed");
        }
    }

    /// Start a crashed oracle again with its persisted state.
    pub fn restart(&mut self, id: OracleId) -> Result<()> {
        ensure!(!self.is_running(id), "oracle {id} is still running");
        let endpoint = self
            .network
            .reconnect(id)
            .with_context(|| format!("no oracle {id} in the cluster"))?;

        info!(oracle_id = id, "Restarting oracle");
        self.network.isolate(id, false);
        self.spawn(endpoint);
        Ok(())
    }

    /// Poll `condition` until it holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, mut condition: impl FnMut(&Self) -> bool) -> bool {
        tokio::time::timeout(timeout, async {
            while !condition(self) {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Wait until every oracle in `ids` delivered `seq_nr` or later.
    pub async fn wait_for_deliveries(&self, ids: &[OracleId], seq_nr: SeqNr, timeout: Duration) -> bool {
        self.wait_until(timeout, |cluster| {
            ids.iter().all(|&id| cluster.highest_delivered(id) >= seq_nr)
        })
        .await
    }

    /// Wait until the contract holds a report of `seq_nr` or later.
    pub async fn wait_for_transmission(&self, seq_nr: SeqNr, timeout: Duration) -> bool {
        self.wait_until(timeout, |cluster| cluster.contract.latest_seq_nr() >= seq_nr)
            .await
    }

    /// Stop every oracle.
    pub async fn shutdown(mut self) {
        for id in 0..self.nodes.len() as OracleId {
            if let Some(running) = self.nodes[id as usize].running.take() {
                running.cancel.cancel();
                if let Err(e) = running.handle.await {
                    error!(oracle_id = id, error = %e, "Oracle task failed");
                }
            }
        }
        info!(
            latest_seq_nr = self.contract.latest_seq_nr(),
            transmissions = self.contract.transmissions().len(),
            "Cluster stopped"
        );
    }
}
