//! Report Finalization: turning committed outcomes into attested reports.
//!
//! For every delivered outcome each oracle asks the plugin for the reports,
//! signs them with its onchain key and broadcasts the signatures. A report
//! is attested once F+1 oracles supplied valid signatures over it. Oracles
//! that missed the commit (they were behind when it was delivered) notice
//! F+1 signature sets for a sequence number they know nothing about and
//! fetch the certified commit from one of the signers.
//!
//! Checking a batch of report signatures runs on the blocking pool; the
//! outcome comes back to the event loop as a local event.
//!
//! State is kept per sequence number in a window around the high water
//! mark, the (F+1)-th highest sequence number any oracle sent signatures
//! for. Rounds that fall behind the window are reaped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ocr3_config::SharedConfig;
use ocr3_core::{NetworkSender, OnchainKeyring, ReportingPlugin};
use ocr3_types::{
    AttestedReportMany, AttributedOnchainSignature, CertifiedCommit, ConfigDigest, Message,
    MessageToReportFinalization, MessageWithSender, OracleId, ReportPlus, SeqNr,
};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::events::{EventAttestedReport, EventToReportFinalization};
use crate::plugin_caller::{call_plugin, Deadline, PLUGIN_WATCHDOG_GRACE};
use crate::scheduler::Scheduler;

const EXPIRY_DURATION: Duration = Duration::from_secs(60);
const EXPIRY_MIN_ROUNDS: u64 = 10;
const EXPIRY_MAX_ROUNDS: u64 = 50;

const LOOKAHEAD_DURATION: Duration = Duration::from_secs(30);
const LOOKAHEAD_MIN_ROUNDS: u64 = 4;
const LOOKAHEAD_MAX_ROUNDS: u64 = 10;

const LOCAL_EVENT_QUEUE_SIZE: usize = 16;

/// Number of rounds kept behind and accepted ahead of the high water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundWindows {
    /// Rounds older than `hwm - expiry_rounds` are dropped
    pub expiry_rounds: u64,
    /// Rounds newer than `hwm + lookahead_rounds` are dropped
    pub lookahead_rounds: u64,
}

impl RoundWindows {
    /// Windows covering roughly 60 s behind and 30 s ahead at the given
    /// round rate.
    pub fn new(min_round_interval: Duration) -> Self {
        Self {
            expiry_rounds: round_window_size(
                EXPIRY_MIN_ROUNDS,
                EXPIRY_MAX_ROUNDS,
                EXPIRY_DURATION,
                min_round_interval,
            ),
            lookahead_rounds: round_window_size(
                LOOKAHEAD_MIN_ROUNDS,
                LOOKAHEAD_MAX_ROUNDS,
                LOOKAHEAD_DURATION,
                min_round_interval,
            ),
        }
    }

    /// Whether `seq_nr` fell behind the window.
    pub fn is_beyond_expiry(&self, high_water_mark: SeqNr, seq_nr: SeqNr) -> bool {
        high_water_mark > self.expiry_rounds && seq_nr < high_water_mark - self.expiry_rounds
    }

    /// Whether `seq_nr` is too far ahead to keep state for.
    pub fn is_beyond_lookahead(&self, high_water_mark: SeqNr, seq_nr: SeqNr) -> bool {
        seq_nr > self.lookahead_rounds && high_water_mark < seq_nr - self.lookahead_rounds
    }
}

fn round_window_size(min: u64, max: u64, window: Duration, min_round_interval: Duration) -> u64 {
    if min_round_interval.is_zero() {
        return max;
    }
    let size = window.as_nanos().div_ceil(min_round_interval.as_nanos());
    size.clamp(min as u128, max as u128) as u64
}

/// The (F+1)-th largest entry of `highest`.
fn high_water_mark(highest: &[SeqNr], f: usize) -> SeqNr {
    let mut sorted = highest.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.get(f).copied().unwrap_or(0)
}

/// Signature sets of one round that have not been checked yet.
struct VerificationBatch<RI> {
    config_digest: ConfigDigest,
    seq_nr: SeqNr,
    reports: Vec<ReportPlus<RI>>,
    /// (signer, configured onchain key, signatures)
    unverified: Vec<(OracleId, Option<Vec<u8>>, Vec<Vec<u8>>)>,
}

impl<RI: Send + Sync + 'static> VerificationBatch<RI> {
    fn verify(self, keyring: &dyn OnchainKeyring<RI>) -> Vec<(OracleId, bool)> {
        self.unverified
            .into_par_iter()
            .map(|(oracle_id, public_key, signatures)| {
                let valid = public_key.is_some_and(|public_key| {
                    verify_report_signatures(
                        keyring,
                        &public_key,
                        self.config_digest,
                        self.seq_nr,
                        &self.reports,
                        &signatures,
                    )
                });
                (oracle_id, valid)
            })
            .collect()
    }
}

/// Whether `signatures` holds one valid signature per report, in order.
fn verify_report_signatures<RI: Sync + 'static>(
    keyring: &dyn OnchainKeyring<RI>,
    public_key: &[u8],
    config_digest: ConfigDigest,
    seq_nr: SeqNr,
    reports: &[ReportPlus<RI>],
    signatures: &[Vec<u8>],
) -> bool {
    reports.len() == signatures.len()
        && reports
            .par_iter()
            .zip(signatures.par_iter())
            .all(|(report_plus, signature)| {
                keyring.verify(
                    public_key,
                    config_digest,
                    seq_nr,
                    &report_plus.report_with_info,
                    signature,
                )
            })
}

#[derive(Debug, Clone, Default)]
struct OracleRecord {
    signatures: Vec<Vec<u8>>,
    valid_signatures: Option<bool>,
    we_requested: bool,
    they_serviced: bool,
    we_serviced: bool,
}

struct Round<RI> {
    cancel: CancellationToken,
    verified_certified_commit: Option<CertifiedCommit>,
    reports: Option<Vec<ReportPlus<RI>>>,
    oracles: Vec<OracleRecord>,
    started_fetch: bool,
    verifying: bool,
    complete: bool,
}

impl<RI> Round<RI> {
    fn new(n: usize, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            verified_certified_commit: None,
            reports: None,
            oracles: vec![OracleRecord::default(); n],
            started_fetch: false,
            verifying: false,
            complete: false,
        }
    }
}

enum LocalEvent<RI> {
    ReportsComputed {
        seq_nr: SeqNr,
        reports: Vec<ReportPlus<RI>>,
    },
    SignaturesVerified {
        seq_nr: SeqNr,
        results: Vec<(OracleId, bool)>,
    },
}

/// Channels connecting Report Finalization to the rest of the oracle.
pub struct ReportFinalizationChannels<RI> {
    /// Report finalization messages from the network
    pub from_net: mpsc::Receiver<MessageWithSender<MessageToReportFinalization>>,
    /// Delivered outcomes
    pub from_report_generation: mpsc::Receiver<EventToReportFinalization>,
    /// Attested reports
    pub to_transmission: mpsc::Sender<EventAttestedReport<RI>>,
}

/// External collaborators used by Report Finalization.
pub struct ReportFinalizationDeps<RI> {
    /// Outbound network
    pub net: Arc<dyn NetworkSender>,
    /// Report signing key
    pub onchain_keyring: Arc<dyn OnchainKeyring<RI>>,
    /// Application logic
    pub plugin: Arc<dyn ReportingPlugin<RI>>,
}

/// Report Finalization state machine of one oracle.
pub struct ReportFinalization<RI> {
    config: Arc<SharedConfig>,
    deps: ReportFinalizationDeps<RI>,
    channels: ReportFinalizationChannels<RI>,
    cancel: CancellationToken,

    scheduler: Scheduler<SeqNr>,
    local_tx: mpsc::Sender<LocalEvent<RI>>,
    local_rx: mpsc::Receiver<LocalEvent<RI>>,
    tasks: JoinSet<()>,

    windows: RoundWindows,
    rounds: HashMap<SeqNr, Round<RI>>,
    high_water_mark: SeqNr,
    highest_report_signatures_seq_nr: Vec<SeqNr>,
}

impl<RI> ReportFinalization<RI>
where
    RI: Clone + Send + Sync + 'static,
{
    /// Create the state machine.
    pub fn new(
        config: Arc<SharedConfig>,
        deps: ReportFinalizationDeps<RI>,
        channels: ReportFinalizationChannels<RI>,
        cancel: CancellationToken,
    ) -> Self {
        let n = config.public.n();
        let windows = RoundWindows::new(config.public.min_round_interval());
        let (local_tx, local_rx) = mpsc::channel(LOCAL_EVENT_QUEUE_SIZE);
        Self {
            config,
            deps,
            channels,
            cancel,
            scheduler: Scheduler::new(),
            local_tx,
            local_rx,
            tasks: JoinSet::new(),
            windows,
            rounds: HashMap::new(),
            high_water_mark: 0,
            highest_report_signatures_seq_nr: vec![0; n],
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(
            expiry_rounds = self.windows.expiry_rounds,
            lookahead_rounds = self.windows.lookahead_rounds,
            "Running ReportFinalization"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(msg) = self.channels.from_net.recv() => {
                    self.message_to_report_finalization(msg.msg, msg.sender).await;
                }

                Some(event) = self.channels.from_report_generation.recv() => match event {
                    EventToReportFinalization::CommittedOutcome { certified_commit } => {
                        self.received_verified_certified_commit(certified_commit);
                    }
                },

                Some(event) = self.local_rx.recv() => match event {
                    LocalEvent::ReportsComputed { seq_nr, reports } => {
                        self.event_reports_computed(seq_nr, reports);
                    }
                    LocalEvent::SignaturesVerified { seq_nr, results } => {
                        self.event_signatures_verified(seq_nr, results).await;
                    }
                },

                Some(seq_nr) = self.scheduler.scheduled().recv() => self.event_missing_outcome(seq_nr),

                Some(_) = self.tasks.join_next() => {}
            }
        }

        for round in self.rounds.values() {
            round.cancel.cancel();
        }
        self.tasks.shutdown().await;
        self.scheduler.close().await;
        info!(high_water_mark = self.high_water_mark, "ReportFinalization: exiting");
    }

    async fn message_to_report_finalization(&mut self, msg: MessageToReportFinalization, sender: OracleId) {
        match msg {
            MessageToReportFinalization::ReportSignatures {
                seq_nr,
                report_signatures,
            } => {
                self.message_report_signatures(sender, seq_nr, report_signatures)
                    .await
            }
            MessageToReportFinalization::CertifiedCommitRequest { seq_nr } => {
                self.message_certified_commit_request(sender, seq_nr)
            }
            MessageToReportFinalization::SupplyCertifiedCommit { certified_commit } => {
                self.message_supply_certified_commit(sender, certified_commit)
            }
        }
    }

    async fn message_report_signatures(&mut self, sender: OracleId, seq_nr: SeqNr, signatures: Vec<Vec<u8>>) {
        self.try_reap(seq_nr, sender);

        if self.windows.is_beyond_expiry(self.high_water_mark, seq_nr) {
            debug!(msg_seq_nr = seq_nr, sender, "Dropping ReportSignatures for expired seq_nr");
            return;
        }
        if self.windows.is_beyond_lookahead(self.high_water_mark, seq_nr) {
            debug!(msg_seq_nr = seq_nr, sender, "Dropping ReportSignatures for seq_nr beyond lookahead");
            return;
        }

        let round = self.round_entry(seq_nr);
        let Some(oracle) = round.oracles.get_mut(sender as usize) else {
            return;
        };
        if !oracle.signatures.is_empty() {
            debug!(msg_seq_nr = seq_nr, sender, "Dropping ReportSignatures with duplicate signature");
            return;
        }
        oracle.signatures = signatures;

        self.try_complete(seq_nr).await;
    }

    fn event_missing_outcome(&mut self, seq_nr: SeqNr) {
        let Some(round) = self.rounds.get(&seq_nr) else {
            debug!(
                seq_nr,
                high_water_mark = self.high_water_mark,
                "Dropping MissingOutcome for unknown seq_nr"
            );
            return;
        };
        if round.verified_certified_commit.is_some() {
            debug!(seq_nr, "Dropping MissingOutcome, already have outcome");
            return;
        }

        self.try_request_certified_commit(seq_nr);
    }

    fn message_certified_commit_request(&mut self, sender: OracleId, seq_nr: SeqNr) {
        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            debug!(
                msg_seq_nr = seq_nr,
                sender,
                high_water_mark = self.high_water_mark,
                "Dropping CertifiedCommitRequest for unknown seq_nr"
            );
            return;
        };
        let Some(certified_commit) = round.verified_certified_commit.clone() else {
            debug!(msg_seq_nr = seq_nr, sender, "Dropping CertifiedCommitRequest for unknown certified commit");
            return;
        };
        let Some(oracle) = round.oracles.get_mut(sender as usize) else {
            return;
        };
        if oracle.we_serviced {
            warn!(msg_seq_nr = seq_nr, sender, "Dropping duplicate CertifiedCommitRequest");
            return;
        }
        oracle.we_serviced = true;

        debug!(msg_seq_nr = seq_nr, to = sender, "Sending SupplyCertifiedCommit");
        self.deps.net.send_to(
            Message::ReportFinalization(MessageToReportFinalization::SupplyCertifiedCommit {
                certified_commit,
            }),
            sender,
        );
    }

    fn message_supply_certified_commit(&mut self, sender: OracleId, certified_commit: CertifiedCommit) {
        let seq_nr = certified_commit.seq_nr;
        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            warn!(
                msg_seq_nr = seq_nr,
                sender,
                high_water_mark = self.high_water_mark,
                "Dropping SupplyCertifiedCommit for unknown seq_nr"
            );
            return;
        };

        let Some(oracle) = round.oracles.get_mut(sender as usize) else {
            return;
        };
        if !(oracle.we_requested && !oracle.they_serviced) {
            warn!(
                msg_seq_nr = seq_nr,
                sender,
                we_requested = oracle.we_requested,
                they_serviced = oracle.they_serviced,
                "Dropping unexpected SupplyCertifiedCommit"
            );
            return;
        }
        oracle.they_serviced = true;

        if round.verified_certified_commit.is_some() {
            debug!(msg_seq_nr = seq_nr, sender, "Dropping redundant SupplyCertifiedCommit");
            return;
        }

        if let Err(e) = certified_commit.verify(
            self.config.public.config_digest,
            &self.config.public.oracle_identities,
            self.config.public.byz_quorum_size(),
        ) {
            warn!(msg_seq_nr = seq_nr, sender, error = %e, "Dropping SupplyCertifiedCommit with invalid certified commit");
            return;
        }

        debug!(msg_seq_nr = seq_nr, sender, "Received valid SupplyCertifiedCommit");
        self.received_verified_certified_commit(certified_commit);
    }

    fn try_request_certified_commit(&mut self, seq_nr: SeqNr) {
        let delay = self.config.public.delta_certified_commit_request();
        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            return;
        };

        // only ask oracles that signed, and each of them at most once
        let candidates: Vec<usize> = round
            .oracles
            .iter()
            .enumerate()
            .filter(|(_, oracle)| !oracle.we_requested && !oracle.signatures.is_empty())
            .map(|(oracle_id, _)| oracle_id)
            .collect();

        let Some(&candidate) = candidates.choose(&mut rand::thread_rng()) else {
            debug!(seq_nr, "No oracle left to request certified commit from");
            return;
        };
        round.oracles[candidate].we_requested = true;

        debug!(seq_nr, to = candidate, "Sending CertifiedCommitRequest");
        self.deps.net.send_to(
            Message::ReportFinalization(MessageToReportFinalization::CertifiedCommitRequest {
                seq_nr,
            }),
            candidate as OracleId,
        );
        self.scheduler.schedule_delay(seq_nr, delay);
    }

    async fn try_complete(&mut self, seq_nr: SeqNr) {
        let f = self.config.public.f;

        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            return;
        };
        if round.complete {
            debug!(seq_nr, "Cannot complete, already completed");
            return;
        }

        if round.verified_certified_commit.is_none() {
            let signers = round
                .oracles
                .iter()
                .filter(|oracle| !oracle.signatures.is_empty())
                .count();
            if signers <= f {
                debug!(seq_nr, signers, threshold = f + 1, "Cannot complete, missing CertifiedCommit and signatures");
            } else if !round.started_fetch {
                round.started_fetch = true;
                self.scheduler
                    .schedule_delay(seq_nr, self.config.public.delta_certified_commit_request());
            }
            return;
        }

        let Some(reports) = &round.reports else {
            debug!(seq_nr, "Cannot complete, reports not computed yet");
            return;
        };

        let mut good_signers = 0;
        let mut unverified = Vec::new();
        let mut signatures_per_report: Vec<Vec<AttributedOnchainSignature>> = vec![Vec::new(); reports.len()];
        for (oracle_id, oracle) in round.oracles.iter().enumerate() {
            if good_signers > f {
                break;
            }
            match oracle.valid_signatures {
                Some(true) => {
                    good_signers += 1;
                    for (signatures, signature) in signatures_per_report.iter_mut().zip(&oracle.signatures) {
                        signatures.push(AttributedOnchainSignature {
                            signature: signature.clone(),
                            signer: oracle_id as OracleId,
                        });
                    }
                }
                None if !oracle.signatures.is_empty() => unverified.push(oracle_id),
                _ => {}
            }
        }

        if good_signers <= f {
            if unverified.is_empty() || round.verifying {
                debug!(
                    seq_nr,
                    good_signers,
                    threshold = f + 1,
                    verifying = round.verifying,
                    "Cannot complete, insufficient number of signatures"
                );
                return;
            }

            round.verifying = true;
            let batch = VerificationBatch {
                config_digest: self.config.public.config_digest,
                seq_nr,
                reports: reports.clone(),
                unverified: unverified
                    .into_iter()
                    .map(|oracle_id| {
                        let public_key = self
                            .config
                            .public
                            .oracle_identities
                            .get(oracle_id)
                            .map(|identity| identity.onchain_public_key.clone());
                        (oracle_id as OracleId, public_key, round.oracles[oracle_id].signatures.clone())
                    })
                    .collect(),
            };
            debug!(seq_nr, signers = batch.unverified.len(), "Verifying report signatures");

            let keyring = self.deps.onchain_keyring.clone();
            let round_cancel = round.cancel.clone();
            let tx = self.local_tx.clone();
            self.tasks.spawn(
                async move {
                    let results =
                        match tokio::task::spawn_blocking(move || batch.verify(keyring.as_ref())).await {
                            Ok(results) => results,
                            Err(e) => {
                                error!(seq_nr, error = %e, "Report signature verification task failed");
                                return;
                            }
                        };
                    tokio::select! {
                        _ = tx.send(LocalEvent::SignaturesVerified { seq_nr, results }) => {}
                        _ = round_cancel.cancelled() => {}
                    }
                }
                .instrument(Span::current()),
            );
            return;
        }

        round.complete = true;

        let events: Vec<EventAttestedReport<RI>> = reports
            .iter()
            .zip(signatures_per_report)
            .enumerate()
            .map(|(index, (report_plus, attributed_signatures))| EventAttestedReport {
                seq_nr,
                index,
                attested_report: AttestedReportMany {
                    report_with_info: report_plus.report_with_info.clone(),
                    attributed_signatures,
                },
                transmission_schedule_override: report_plus.transmission_schedule_override.clone(),
            })
            .collect();

        debug!(seq_nr, reports = events.len(), "Sending attested reports to Transmission");
        for event in events {
            tokio::select! {
                sent = self.channels.to_transmission.send(event) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    fn received_verified_certified_commit(&mut self, certified_commit: CertifiedCommit) {
        let seq_nr = certified_commit.seq_nr;
        if self
            .rounds
            .get(&seq_nr)
            .is_some_and(|round| round.verified_certified_commit.is_some())
        {
            debug!(seq_nr, "Dropping redundant CertifiedCommit");
            return;
        }

        let round = self.round_entry(seq_nr);
        round.verified_certified_commit = Some(certified_commit.clone());
        let round_cancel = round.cancel.clone();

        let plugin = self.deps.plugin.clone();
        let tx = self.local_tx.clone();
        self.tasks.spawn(
            async move {
                let Some(reports) = call_plugin(
                    "Reports",
                    Duration::ZERO,
                    Deadline::Soft,
                    PLUGIN_WATCHDOG_GRACE,
                    &round_cancel,
                    plugin.reports(seq_nr, &certified_commit.outcome),
                )
                .await
                else {
                    return;
                };

                debug!(seq_nr, reports = reports.len(), "Successfully invoked ReportingPlugin::reports");

                tokio::select! {
                    _ = tx.send(LocalEvent::ReportsComputed { seq_nr, reports }) => {}
                    _ = round_cancel.cancelled() => {}
                }
            }
            .instrument(Span::current()),
        );
    }

    fn event_reports_computed(&mut self, seq_nr: SeqNr, reports: Vec<ReportPlus<RI>>) {
        let config_digest = self.config.public.config_digest;
        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            debug!(
                seq_nr,
                high_water_mark = self.high_water_mark,
                "Dropping ReportsComputed for unknown seq_nr"
            );
            return;
        };

        let keyring = self.deps.onchain_keyring.as_ref();
        let signed: Result<Vec<Vec<u8>>, _> = reports
            .iter()
            .enumerate()
            .map(|(index, report_plus)| {
                keyring
                    .sign(config_digest, seq_nr, &report_plus.report_with_info)
                    .map_err(|e| (index, e))
            })
            .collect();
        round.reports = Some(reports);

        let signatures = match signed {
            Ok(signatures) => signatures,
            Err((index, e)) => {
                error!(seq_nr, index, error = %e, "Error while signing report");
                return;
            }
        };

        debug!(seq_nr, "Broadcasting ReportSignatures");
        // completion follows from receiving our own broadcast
        self.deps.net.broadcast(Message::ReportFinalization(
            MessageToReportFinalization::ReportSignatures {
                seq_nr,
                report_signatures: signatures,
            },
        ));
    }

    async fn event_signatures_verified(&mut self, seq_nr: SeqNr, results: Vec<(OracleId, bool)>) {
        let Some(round) = self.rounds.get_mut(&seq_nr) else {
            debug!(seq_nr, "Dropping SignaturesVerified for unknown seq_nr");
            return;
        };
        round.verifying = false;

        let reports_len = round.reports.as_ref().map_or(0, Vec::len);
        for (oracle_id, valid) in results {
            let Some(oracle) = round.oracles.get_mut(oracle_id as usize) else {
                continue;
            };
            oracle.valid_signatures = Some(valid);
            if !valid {
                warn!(
                    sender = oracle_id,
                    seq_nr,
                    signatures_len = oracle.signatures.len(),
                    reports_len,
                    "Report signatures failed to verify. This is commonly caused by non-determinism in the ReportingPlugin"
                );
            }
        }

        self.try_complete(seq_nr).await;
    }

    fn round_entry(&mut self, seq_nr: SeqNr) -> &mut Round<RI> {
        let n = self.config.public.n();
        let cancel = &self.cancel;
        self.rounds
            .entry(seq_nr)
            .or_insert_with(|| Round::new(n, cancel.child_token()))
    }

    /// Raise the high water mark from a sender's signatures, reaping old
    /// rounds when it advances.
    fn try_reap(&mut self, seq_nr: SeqNr, sender: OracleId) {
        let Some(highest) = self.highest_report_signatures_seq_nr.get_mut(sender as usize) else {
            return;
        };
        if *highest >= seq_nr {
            return;
        }
        *highest = seq_nr;

        let new_high_water_mark =
            high_water_mark(&self.highest_report_signatures_seq_nr, self.config.public.f);
        if self.high_water_mark >= new_high_water_mark {
            return;
        }
        self.high_water_mark = new_high_water_mark;
        self.reap();
    }

    fn reap(&mut self) {
        let max_active_rounds = self.windows.expiry_rounds + self.windows.lookahead_rounds;
        if 3 * self.rounds.len() as u64 <= 4 * max_active_rounds {
            return;
        }

        let before = self.rounds.len();
        let windows = self.windows;
        let high_water_mark = self.high_water_mark;
        self.rounds.retain(|&seq_nr, round| {
            if windows.is_beyond_expiry(high_water_mark, seq_nr) {
                round.cancel.cancel();
                false
            } else {
                true
            }
        });

        debug!(before, after = self.rounds.len(), high_water_mark, "Reaped expired rounds");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocr3_core::EvmOnchainKeyring;

    #[test]
    fn test_round_windows_clamp() {
        // 1 s rounds: 60 and 30 rounds, clamped to 50 and 10
        let windows = RoundWindows::new(Duration::from_secs(1));
        assert_eq!(windows.expiry_rounds, 50);
        assert_eq!(windows.lookahead_rounds, 10);

        // 10 s rounds: 6 and 3 rounds, clamped to 10 and 4
        let windows = RoundWindows::new(Duration::from_secs(10));
        assert_eq!(windows.expiry_rounds, 10);
        assert_eq!(windows.lookahead_rounds, 4);

        // 2.5 s rounds: 24 and 12, the lookahead clamped to 10
        let windows = RoundWindows::new(Duration::from_millis(2500));
        assert_eq!(windows.expiry_rounds, 24);
        assert_eq!(windows.lookahead_rounds, 10);

        // 7 s rounds: ceil(60/7) = 9 -> 10, ceil(30/7) = 5
        let windows = RoundWindows::new(Duration::from_secs(7));
        assert_eq!(windows.expiry_rounds, 10);
        assert_eq!(windows.lookahead_rounds, 5);

        assert_eq!(RoundWindows::new(Duration::ZERO).expiry_rounds, 50);
    }

    #[test]
    fn test_expiry_and_lookahead_bounds() {
        let windows = RoundWindows {
            expiry_rounds: 10,
            lookahead_rounds: 4,
        };

        assert!(!windows.is_beyond_expiry(10, 0));
        assert!(!windows.is_beyond_expiry(20, 10));
        assert!(windows.is_beyond_expiry(20, 9));

        assert!(!windows.is_beyond_lookahead(0, 4));
        assert!(windows.is_beyond_lookahead(0, 5));
        assert!(!windows.is_beyond_lookahead(20, 24));
        assert!(windows.is_beyond_lookahead(20, 25));
    }

    #[test]
    fn test_high_water_mark_is_f_plus_one_th_largest() {
        assert_eq!(high_water_mark(&[5, 9, 1, 7], 1), 7);
        assert_eq!(high_water_mark(&[5, 9, 1, 7], 0), 9);
        assert_eq!(high_water_mark(&[5, 9, 1, 7], 3), 1);
        // a single Byzantine oracle cannot move it
        assert_eq!(high_water_mark(&[u64::MAX, 3, 3, 2], 1), 3);
    }

    fn reports(contents: &[&[u8]]) -> Vec<ReportPlus<()>> {
        contents
            .iter()
            .map(|report| ReportPlus::new(report.to_vec(), ()))
            .collect()
    }

    #[test]
    fn test_verify_report_signatures() {
        let keyring = EvmOnchainKeyring::random();
        let config_digest = ConfigDigest::default();
        let reports = reports(&[b"a", b"b", b"c"]);
        let signatures: Vec<Vec<u8>> = reports
            .iter()
            .map(|rp| keyring.sign(config_digest, 3, &rp.report_with_info).unwrap())
            .collect();
        let public_key = OnchainKeyring::<()>::public_key(&keyring);

        assert!(verify_report_signatures(&keyring, &public_key, config_digest, 3, &reports, &signatures));
        // wrong sequence number
        assert!(!verify_report_signatures(&keyring, &public_key, config_digest, 4, &reports, &signatures));
        // length mismatch
        assert!(!verify_report_signatures(&keyring, &public_key, config_digest, 3, &reports, &signatures[..2]));

        let mut swapped = signatures.clone();
        swapped.swap(0, 1);
        assert!(!verify_report_signatures(&keyring, &public_key, config_digest, 3, &reports, &swapped));
    }

    #[test]
    fn test_verify_report_signatures_empty() {
        let keyring = EvmOnchainKeyring::random();
        let public_key = OnchainKeyring::<()>::public_key(&keyring);
        assert!(verify_report_signatures::<()>(&keyring, &public_key, ConfigDigest::default(), 1, &[], &[]));
    }
}
