//! Report Generation: agreeing on one outcome per sequence number.
//!
//! Each epoch has one leader. The leader collects the highest certificates
//! of a quorum (`Reconcile`), starts the epoch from the maximum
//! (`EpochStart`), then drives rounds:
//!
//! ```text
//! leader                         followers
//!   │── RoundStart(query) ─────────►│
//!   │◄──────────── Observation ─────│
//!   │   (2F+1 observations, ΔGrace)  │
//!   │── Propose(observations) ─────►│  Outcome(...)
//!   │            ◄── Prepare ──►     │  all to all, quorum → CertifiedPrepare
//!   │            ◄── Commit ───►     │  all to all, quorum → CertifiedCommit
//!   │                                │  deliver → Report Finalization
//! ```
//!
//! Every oracle runs the follower half; the leader also runs the leader half.
//! Plugin calls run as background tasks and report back through a local
//! queue, tagged with the epoch and sequence number they were issued for.

mod follower;
mod leader;

use std::future::Future;
use std::sync::Arc;

use ocr3_config::{LocalConfig, SharedConfig};
use ocr3_core::{Database, NetworkSender, OffchainKeyring, ReportingPlugin};
use ocr3_crypto::Ed25519PublicKey;
use ocr3_types::{
    CertifiedPrepareOrCommit, Epoch, Message, MessageToReportGeneration, MessageWithSender,
    Observation, OracleId, Outcome, OutcomeContext, OutcomeInputsDigest, Query, SeqNr,
    SignedHighestCertifiedTimestamp, Timestamp,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, Instrument, Span};

use crate::events::{EventToPacemaker, EventToReportFinalization, EventToReportGeneration};
use crate::message_buffer::MessageBuffer;
use crate::pacemaker::leader;

use self::follower::FollowerState;
use self::leader::LeaderState;

/// Messages buffered per sender for epochs we have not reached yet.
pub const FUTURE_MESSAGE_BUFFER_SIZE: usize = 10;

/// Slots each sender gets in every round pool.
pub const POOL_CAPACITY: usize = 10;

const LOCAL_EVENT_QUEUE_SIZE: usize = 16;

/// Results of background plugin calls.
#[derive(Debug)]
enum LocalEvent {
    QueryDone {
        epoch: Epoch,
        seq_nr: SeqNr,
        query: Option<Query>,
    },
    ObservationDone {
        epoch: Epoch,
        seq_nr: SeqNr,
        observation: Observation,
    },
    OutcomeDone {
        epoch: Epoch,
        seq_nr: SeqNr,
        outcome_inputs_digest: OutcomeInputsDigest,
        outcome: Outcome,
    },
}

/// Channels connecting Report Generation to the rest of the oracle.
pub struct ReportGenerationChannels {
    /// Report generation messages from the network
    pub from_net: mpsc::Receiver<MessageWithSender<MessageToReportGeneration>>,
    /// Epoch notifications
    pub from_pacemaker: mpsc::Receiver<EventToReportGeneration>,
    /// Progress and leader change requests
    pub to_pacemaker: mpsc::Sender<EventToPacemaker>,
    /// Delivered outcomes
    pub to_report_finalization: mpsc::Sender<EventToReportFinalization>,
}

/// External collaborators used by Report Generation.
pub struct ReportGenerationDeps<RI> {
    /// Outbound network
    pub net: Arc<dyn NetworkSender>,
    /// Certificate persistence
    pub database: Arc<dyn Database>,
    /// Protocol signing key
    pub offchain_keyring: Arc<dyn OffchainKeyring>,
    /// Application logic
    pub plugin: Arc<dyn ReportingPlugin<RI>>,
}

/// Report Generation state machine of one oracle.
pub struct ReportGeneration<RI> {
    config: Arc<SharedConfig>,
    local_config: LocalConfig,
    id: OracleId,
    deps: ReportGenerationDeps<RI>,
    channels: ReportGenerationChannels,
    cancel: CancellationToken,

    local_tx: mpsc::Sender<LocalEvent>,
    local_rx: mpsc::Receiver<LocalEvent>,
    tasks: JoinSet<()>,

    e: Epoch,
    l: OracleId,
    buffered_messages: Vec<MessageBuffer<MessageToReportGeneration>>,
    leader_state: LeaderState,
    follower_state: FollowerState,
}

impl<RI> ReportGeneration<RI>
where
    RI: Clone + Send + Sync + 'static,
{
    /// Create the state machine. `restored_cert` is the certificate read from
    /// the database at startup.
    pub fn new(
        config: Arc<SharedConfig>,
        local_config: LocalConfig,
        id: OracleId,
        deps: ReportGenerationDeps<RI>,
        channels: ReportGenerationChannels,
        cancel: CancellationToken,
        restored_cert: CertifiedPrepareOrCommit,
    ) -> Self {
        let n = config.public.n();
        let (local_tx, local_rx) = mpsc::channel(LOCAL_EVENT_QUEUE_SIZE);
        Self {
            config,
            local_config,
            id,
            deps,
            channels,
            cancel,
            local_tx,
            local_rx,
            tasks: JoinSet::new(),
            e: 0,
            l: 0,
            buffered_messages: (0..n)
                .map(|_| MessageBuffer::new(FUTURE_MESSAGE_BUFFER_SIZE))
                .collect(),
            leader_state: LeaderState::new(),
            follower_state: FollowerState::new(restored_cert),
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(
            delivered_seq_nr = self.follower_state.delivered_seq_nr,
            "Running ReportGeneration"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(msg) = self.channels.from_net.recv() => {
                    self.message_to_report_generation(msg.msg, msg.sender).await;
                }

                Some(event) = self.channels.from_pacemaker.recv() => match event {
                    EventToReportGeneration::StartNewEpoch { epoch } => {
                        self.event_start_new_epoch(epoch).await;
                    }
                },

                Some(event) = self.local_rx.recv() => self.local_event(event).await,

                _ = self.leader_state.t_grace.fired() => {
                    self.leader_state.t_grace.disarm();
                    self.event_t_grace_timeout();
                }

                _ = self.leader_state.t_round.fired() => {
                    self.leader_state.t_round.disarm();
                    self.event_t_round_timeout();
                }

                Some(_) = self.tasks.join_next() => {}
            }
        }

        self.tasks.shutdown().await;
        info!(epoch = self.e, leader = self.l, "ReportGeneration: exiting");
    }

    async fn message_to_report_generation(&mut self, msg: MessageToReportGeneration, sender: OracleId) {
        let msg_epoch = msg.epoch();
        if msg_epoch < self.e {
            debug!(epoch = self.e, msg_epoch, sender, kind = msg.kind(), "Dropping message for past epoch");
        } else if msg_epoch == self.e {
            self.process_message(msg, sender).await;
        } else if let Some(buffer) = self.buffered_messages.get_mut(sender as usize) {
            trace!(epoch = self.e, msg_epoch, sender, "Buffering message for future epoch");
            buffer.push(msg);
        }
    }

    async fn process_message(&mut self, msg: MessageToReportGeneration, sender: OracleId) {
        match msg {
            MessageToReportGeneration::Reconcile {
                highest_certified,
                signed_highest_certified_timestamp,
                ..
            } => {
                self.message_reconcile(sender, highest_certified, signed_highest_certified_timestamp)
                    .await
            }
            MessageToReportGeneration::EpochStart {
                epoch_start_proof, ..
            } => self.message_epoch_start(sender, epoch_start_proof).await,
            MessageToReportGeneration::RoundStart { seq_nr, query, .. } => {
                self.message_round_start(sender, seq_nr, query)
            }
            MessageToReportGeneration::Observation {
                seq_nr,
                signed_observation,
                ..
            } => self.message_observation(sender, seq_nr, signed_observation),
            MessageToReportGeneration::Propose {
                seq_nr,
                attributed_signed_observations,
                ..
            } => self.message_propose(sender, seq_nr, attributed_signed_observations),
            MessageToReportGeneration::Prepare {
                seq_nr, signature, ..
            } => self.message_prepare(sender, seq_nr, signature).await,
            MessageToReportGeneration::Commit {
                seq_nr, signature, ..
            } => self.message_commit(sender, seq_nr, signature).await,
        }
    }

    /// Replay buffered messages that became current.
    async fn unbuffer_messages(&mut self) {
        for sender in 0..self.buffered_messages.len() {
            loop {
                let msg_epoch = match self.buffered_messages[sender].peek() {
                    Some(msg) => msg.epoch(),
                    None => break,
                };
                if msg_epoch > self.e {
                    // this and all later messages of the sender are for future epochs
                    break;
                }
                let Some(msg) = self.buffered_messages[sender].pop() else {
                    break;
                };
                if msg_epoch < self.e {
                    debug!(epoch = self.e, msg_epoch, sender, "Unbuffered and dropped message");
                } else {
                    trace!(epoch = self.e, sender, "Unbuffered message for new epoch");
                    self.process_message(msg, sender as OracleId).await;
                }
            }
        }
    }

    async fn event_start_new_epoch(&mut self, epoch: Epoch) {
        info!(epoch, "Starting new epoch");

        self.e = epoch;
        self.l = leader(
            self.e,
            self.config.public.n(),
            &self.config.leader_selection_key(),
        );

        self.follower_state.reset_for_epoch();
        self.leader_state.reset_for_epoch();

        let highest_certified = self.follower_state.cert.clone();
        let highest_certified_timestamp = highest_certified.timestamp();
        let keyring = self.deps.offchain_keyring.clone();
        let signed = match SignedHighestCertifiedTimestamp::make(
            &self.timestamp(),
            highest_certified_timestamp,
            |msg| keyring.offchain_sign(msg),
        ) {
            Ok(signed) => signed,
            Err(e) => {
                error!(error = %e, "Error signing highest certified timestamp");
                return;
            }
        };

        info!(
            epoch,
            leader = self.l,
            highest_certified_timestamp = %highest_certified_timestamp,
            "Sending Reconcile to leader"
        );
        self.send_to(
            MessageToReportGeneration::Reconcile {
                epoch,
                highest_certified,
                signed_highest_certified_timestamp: signed,
            },
            self.l,
        );

        if self.id == self.l {
            self.leader_state
                .t_round
                .arm(self.config.public.delta_round());
        }

        self.unbuffer_messages().await;
    }

    async fn local_event(&mut self, event: LocalEvent) {
        match event {
            LocalEvent::QueryDone {
                epoch,
                seq_nr,
                query,
            } => self.event_query_done(epoch, seq_nr, query),
            LocalEvent::ObservationDone {
                epoch,
                seq_nr,
                observation,
            } => self.event_observation_done(epoch, seq_nr, observation),
            LocalEvent::OutcomeDone {
                epoch,
                seq_nr,
                outcome_inputs_digest,
                outcome,
            } => self.event_outcome_done(epoch, seq_nr, outcome_inputs_digest, outcome),
        }
    }

    // =========================================================================
    // Helpers shared by the leader and follower halves
    // =========================================================================

    fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.config.public.config_digest, self.e)
    }

    fn n(&self) -> usize {
        self.config.public.n()
    }

    fn f(&self) -> usize {
        self.config.public.f
    }

    fn byz_quorum_size(&self) -> usize {
        self.config.public.byz_quorum_size()
    }

    fn public_key(&self, oracle: OracleId) -> Option<&Ed25519PublicKey> {
        self.config
            .public
            .oracle_identities
            .get(oracle as usize)
            .map(|identity| &identity.offchain_public_key)
    }

    /// Context for plugin calls about `seq_nr`, which must be the successor
    /// of the last delivered sequence number.
    fn outcome_ctx(&self, seq_nr: SeqNr) -> Option<OutcomeContext> {
        let delivered = self.follower_state.delivered_seq_nr;
        if seq_nr != delivered + 1 {
            error!(
                critical = true,
                seq_nr,
                delivered_seq_nr = delivered,
                "Assumption violation, seq_nr isn't successor to delivered_seq_nr"
            );
            return None;
        }
        Some(OutcomeContext {
            seq_nr,
            previous_outcome: self.follower_state.delivered_outcome.clone(),
            epoch: self.e,
            round: seq_nr - self.follower_state.first_seq_nr_of_epoch + 1,
        })
    }

    fn send_to(&self, msg: MessageToReportGeneration, to: OracleId) {
        self.deps.net.send_to(Message::ReportGeneration(msg), to);
    }

    fn broadcast(&self, msg: MessageToReportGeneration) {
        self.deps.net.broadcast(Message::ReportGeneration(msg));
    }

    /// Run a plugin call in the background and post its result to the loop.
    fn spawn_local<F>(&mut self, call: F)
    where
        F: Future<Output = Option<LocalEvent>> + Send + 'static,
    {
        let tx = self.local_tx.clone();
        self.tasks.spawn(
            async move {
                if let Some(event) = call.await {
                    let _ = tx.send(event).await;
                }
            }
            .instrument(Span::current()),
        );
    }

    async fn send_to_pacemaker(&self, event: EventToPacemaker) -> bool {
        tokio::select! {
            sent = self.channels.to_pacemaker.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn send_to_report_finalization(&self, event: EventToReportFinalization) -> bool {
        tokio::select! {
            sent = self.channels.to_report_finalization.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }
}
