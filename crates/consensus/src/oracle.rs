//! Oracle orchestrator: one running instance of the protocol per
//! configuration.
//!
//! [`run_oracle`] restores the persisted certificate, wires the four state
//! machines together with bounded queues, and routes inbound network
//! messages to them until cancelled.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ocr3_config::{LocalConfig, SharedConfig};
use ocr3_core::{
    ContractTransmitter, Database, NetworkEndpoint, OffchainKeyring, OnchainKeyring,
    ReportingPlugin,
};
use ocr3_types::{
    CertifiedCommit, CertifiedPrepareOrCommit, Message, MessageWithSender, OracleId,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::pacemaker::{Pacemaker, PacemakerChannels};
use crate::report_finalization::{
    ReportFinalization, ReportFinalizationChannels, ReportFinalizationDeps,
};
use crate::report_generation::{
    ReportGeneration, ReportGenerationChannels, ReportGenerationDeps,
};
use crate::transmission::{Transmission, TransmissionChannels, TransmissionDeps};

/// Capacity of the queues between components.
pub const CHANNEL_CAPACITY: usize = 16;

/// Pause between attempts to read the persisted certificate.
pub const RESTORE_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Everything an oracle needs besides its network endpoint.
pub struct OracleArgs<RI> {
    /// Configuration shared by all oracles
    pub config: Arc<SharedConfig>,
    /// Settings of this node
    pub local_config: LocalConfig,
    /// Our index in the configuration
    pub id: OracleId,
    /// Certificate persistence
    pub database: Arc<dyn Database>,
    /// Protocol signing key
    pub offchain_keyring: Arc<dyn OffchainKeyring>,
    /// Report signing key
    pub onchain_keyring: Arc<dyn OnchainKeyring<RI>>,
    /// Application logic
    pub plugin: Arc<dyn ReportingPlugin<RI>>,
    /// Report delivery
    pub contract_transmitter: Arc<dyn ContractTransmitter<RI>>,
}

/// Call `f` until it succeeds, bounding each attempt by `timeout` and
/// pausing `retry_period` between attempts.
///
/// Returns `None` once `cancel` fires.
pub async fn try_until_success<T, E, F, Fut>(
    name: &'static str,
    cancel: &CancellationToken,
    retry_period: Duration,
    timeout: Duration,
    mut f: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return None,
            attempt = tokio::time::timeout(timeout, f()) => attempt,
        };

        match attempt {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => error!(error = %e, "{} failed, retrying", name),
            Err(_) => error!(
                timeout_ms = timeout.as_millis() as u64,
                "{} timed out, retrying", name
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(retry_period) => {}
        }
    }
}

async fn forward<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) {
    tokio::select! {
        _ = tx.send(item) => {}
        _ = cancel.cancelled() => {}
    }
}

/// Run one oracle until `cancel` fires.
///
/// Failures surface through logs only; the function returns once every
/// component has shut down.
pub async fn run_oracle<RI, E>(args: OracleArgs<RI>, mut endpoint: E, cancel: CancellationToken)
where
    RI: Clone + Send + Sync + 'static,
    E: NetworkEndpoint,
{
    let id = args.id;
    let config = args.config;
    let n = config.public.n();
    let f = config.public.f;

    if let Err(e) = args.local_config.validate() {
        error!(oracle_id = id, error = %e, "Invalid local config");
        return;
    }
    if !args.local_config.dev_mode_skip_resource_checks {
        if let Err(e) = config.public.check_resource_exhaustion() {
            error!(oracle_id = id, error = %e, "Config would exhaust resources");
            return;
        }
    }

    let config_digest = config.public.config_digest;
    let database = args.database.clone();
    let Some(restored) = try_until_success(
        "Database::read_cert",
        &cancel,
        RESTORE_RETRY_PERIOD,
        args.local_config.database_timeout(),
        || database.read_cert(config_digest),
    )
    .await
    else {
        return;
    };
    let restored_cert =
        restored.unwrap_or_else(|| CertifiedPrepareOrCommit::Commit(CertifiedCommit::genesis()));
    let restored_epoch = restored_cert.epoch();

    info!(
        oracle_id = id,
        %config_digest,
        restored_epoch,
        restored_seq_nr = restored_cert.seq_nr(),
        "Running oracle"
    );

    let limits = args.plugin.info().limits;
    let max_report_signature_length = args.onchain_keyring.max_signature_length();
    let net = endpoint.sender();
    let child_cancel = cancel.child_token();

    let (net_to_pacemaker_tx, net_to_pacemaker_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (net_to_report_generation_tx, net_to_report_generation_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (net_to_report_finalization_tx, net_to_report_finalization_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (pacemaker_to_report_generation_tx, pacemaker_to_report_generation_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (report_generation_to_pacemaker_tx, report_generation_to_pacemaker_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (report_generation_to_report_finalization_tx, report_generation_to_report_finalization_rx) =
        mpsc::channel(CHANNEL_CAPACITY);
    let (report_finalization_to_transmission_tx, report_finalization_to_transmission_rx) =
        mpsc::channel(CHANNEL_CAPACITY);

    let mut children = JoinSet::new();

    let pacemaker = Pacemaker::new(
        config.clone(),
        id,
        net.clone(),
        PacemakerChannels {
            from_net: net_to_pacemaker_rx,
            from_report_generation: report_generation_to_pacemaker_rx,
            to_report_generation: pacemaker_to_report_generation_tx,
        },
        child_cancel.clone(),
    );
    children.spawn(
        pacemaker
            .run(restored_epoch)
            .instrument(info_span!("ocr3", proto = "pacemaker", oracle_id = id)),
    );

    let report_generation = ReportGeneration::new(
        config.clone(),
        args.local_config.clone(),
        id,
        ReportGenerationDeps {
            net: net.clone(),
            database: args.database.clone(),
            offchain_keyring: args.offchain_keyring.clone(),
            plugin: args.plugin.clone(),
        },
        ReportGenerationChannels {
            from_net: net_to_report_generation_rx,
            from_pacemaker: pacemaker_to_report_generation_rx,
            to_pacemaker: report_generation_to_pacemaker_tx,
            to_report_finalization: report_generation_to_report_finalization_tx,
        },
        child_cancel.clone(),
        restored_cert,
    );
    children.spawn(
        report_generation
            .run()
            .instrument(info_span!("ocr3", proto = "repgen", oracle_id = id)),
    );

    let report_finalization = ReportFinalization::new(
        config.clone(),
        ReportFinalizationDeps {
            net: net.clone(),
            onchain_keyring: args.onchain_keyring.clone(),
            plugin: args.plugin.clone(),
        },
        ReportFinalizationChannels {
            from_net: net_to_report_finalization_rx,
            from_report_generation: report_generation_to_report_finalization_rx,
            to_transmission: report_finalization_to_transmission_tx,
        },
        child_cancel.clone(),
    );
    children.spawn(
        report_finalization
            .run()
            .instrument(info_span!("ocr3", proto = "repfin", oracle_id = id)),
    );

    let transmission = Transmission::new(
        config.clone(),
        args.local_config.clone(),
        id,
        TransmissionDeps {
            plugin: args.plugin.clone(),
            contract_transmitter: args.contract_transmitter.clone(),
        },
        TransmissionChannels {
            from_report_finalization: report_finalization_to_transmission_rx,
        },
        child_cancel.clone(),
    );
    children.spawn(
        transmission
            .run()
            .instrument(info_span!("ocr3", proto = "transmission", oracle_id = id)),
    );

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = endpoint.receive() => msg,
        };
        let Some(MessageWithSender { msg, sender }) = msg else {
            warn!(oracle_id = id, "Network endpoint closed");
            break;
        };

        if sender as usize >= n {
            error!(critical = true, oracle_id = id, sender, "Message from out of bounds sender");
            continue;
        }
        if !msg.check_size(n, f, &limits, max_report_signature_length) {
            warn!(oracle_id = id, sender, "Dropping message failing size check");
            continue;
        }

        match msg {
            Message::Pacemaker(msg) => {
                forward(&net_to_pacemaker_tx, MessageWithSender::new(msg, sender), &cancel).await
            }
            Message::ReportGeneration(msg) => {
                forward(&net_to_report_generation_tx, MessageWithSender::new(msg, sender), &cancel).await
            }
            Message::ReportFinalization(msg) => {
                forward(&net_to_report_finalization_tx, MessageWithSender::new(msg, sender), &cancel).await
            }
        }
    }

    debug!(oracle_id = id, "Oracle winding down");
    child_cancel.cancel();
    while let Some(result) = children.join_next().await {
        if let Err(e) = result {
            error!(oracle_id = id, error = %e, "Oracle component panicked");
        }
    }

    if let Err(e) = args.plugin.close().await {
        error!(oracle_id = id, error = %e, "Error closing ReportingPlugin");
    }
    info!(oracle_id = id, "Oracle exited");
}
