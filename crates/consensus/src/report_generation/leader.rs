//! Leader half of Report Generation.

use std::collections::BTreeMap;

use ocr3_types::{
    AttributedSignedHighestCertifiedTimestamp, AttributedSignedObservation,
    CertifiedPrepareOrCommit, Epoch, EpochStartProof, MessageToReportGeneration, OracleId, Query,
    SeqNr, SignedHighestCertifiedTimestamp, SignedObservation,
};
use tracing::{debug, error, info, warn};

use super::{LocalEvent, ReportGeneration};
use crate::plugin_caller::{call_plugin, Deadline, PLUGIN_WATCHDOG_GRACE};
use crate::timeout::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LeaderPhase {
    Unknown,
    NewEpoch,
    SentEpochStart,
    Querying,
    SentRoundStart,
    Grace,
    SentPropose,
}

pub(super) struct LeaderState {
    pub(super) phase: LeaderPhase,
    phase_before_query: LeaderPhase,
    highest_certified: Option<CertifiedPrepareOrCommit>,
    highest_certified_proof: Vec<AttributedSignedHighestCertifiedTimestamp>,
    ready_to_start_round: bool,
    pub(super) t_round: Timer,
    query: Query,
    observations: BTreeMap<OracleId, SignedObservation>,
    pub(super) t_grace: Timer,
}

impl LeaderState {
    pub(super) fn new() -> Self {
        Self {
            phase: LeaderPhase::Unknown,
            phase_before_query: LeaderPhase::Unknown,
            highest_certified: None,
            highest_certified_proof: Vec::new(),
            ready_to_start_round: false,
            t_round: Timer::new(),
            query: Query::new(),
            observations: BTreeMap::new(),
            t_grace: Timer::new(),
        }
    }

    pub(super) fn reset_for_epoch(&mut self) {
        self.phase = LeaderPhase::NewEpoch;
        self.highest_certified = None;
        self.highest_certified_proof.clear();
        self.ready_to_start_round = false;
        self.t_round.disarm();
        self.observations.clear();
        self.t_grace.disarm();
    }
}

impl<RI> ReportGeneration<RI>
where
    RI: Clone + Send + Sync + 'static,
{
    pub(super) async fn message_reconcile(
        &mut self,
        sender: OracleId,
        highest_certified: CertifiedPrepareOrCommit,
        signed_hct: SignedHighestCertifiedTimestamp,
    ) {
        if self.l != self.id {
            warn!(sender, "Non-leader received Reconcile");
            return;
        }

        if self.leader_state.phase != LeaderPhase::NewEpoch {
            debug!(sender, phase = ?self.leader_state.phase, "Got Reconcile for wrong phase");
            return;
        }

        if let Err(e) = highest_certified.verify(
            self.config.public.config_digest,
            &self.config.public.oracle_identities,
            self.byz_quorum_size(),
        ) {
            warn!(sender, error = %e, "Reconcile.highest_certified is invalid");
            return;
        }

        let Some(public_key) = self.public_key(sender) else {
            return;
        };
        if let Err(e) = signed_hct.verify(&self.timestamp(), public_key) {
            warn!(sender, error = %e, "Reconcile.signed_highest_certified_timestamp is invalid");
            return;
        }

        if highest_certified.timestamp() != signed_hct.highest_certified_timestamp {
            warn!(sender, "Timestamp mismatch in Reconcile");
            return;
        }

        if self
            .leader_state
            .highest_certified_proof
            .iter()
            .any(|ashct| ashct.signer == sender)
        {
            warn!(sender, "Duplicate Reconcile");
            return;
        }

        debug!(
            sender,
            highest_certified_timestamp = %signed_hct.highest_certified_timestamp,
            "Received valid Reconcile"
        );

        self.leader_state
            .highest_certified_proof
            .push(AttributedSignedHighestCertifiedTimestamp {
                signed_highest_certified_timestamp: signed_hct,
                signer: sender,
            });

        let replace = match &self.leader_state.highest_certified {
            None => true,
            Some(current) => current.timestamp() < highest_certified.timestamp(),
        };
        if replace {
            self.leader_state.highest_certified = Some(highest_certified);
        }

        if self.leader_state.highest_certified_proof.len() != self.byz_quorum_size() {
            return;
        }

        let Some(highest_certified) = self.leader_state.highest_certified.clone() else {
            return;
        };
        let proof = EpochStartProof {
            highest_certified,
            highest_certified_proof: self.leader_state.highest_certified_proof.clone(),
        };
        if let Err(e) = proof.verify(
            &self.timestamp(),
            &self.config.public.oracle_identities,
            self.byz_quorum_size(),
        ) {
            error!(critical = true, error = %e, "EpochStartProof is invalid, very surprising!");
            return;
        }

        self.leader_state.phase = LeaderPhase::SentEpochStart;

        info!(
            highest_certified_timestamp = %proof.highest_certified.timestamp(),
            "Broadcasting EpochStart"
        );
        let highest_certified = proof.highest_certified.clone();
        self.broadcast(MessageToReportGeneration::EpochStart {
            epoch: self.e,
            epoch_start_proof: proof,
        });

        match highest_certified {
            CertifiedPrepareOrCommit::Commit(commit) => {
                if !commit.is_genesis() && !self.deliver(commit).await {
                    return;
                }
                self.follower_state.first_seq_nr_of_epoch = self.follower_state.delivered_seq_nr + 1;
                self.start_subsequent_leader_round();
            }
            CertifiedPrepareOrCommit::Prepare(prepare) => {
                // re-proposal from a failed epoch; no RoundStart for this seq_nr
                self.follower_state.first_seq_nr_of_epoch = prepare.seq_nr + 1;
            }
        }
    }

    pub(super) fn event_t_round_timeout(&mut self) {
        debug!(
            delta_round_ms = self.config.public.delta_round_ms,
            "TRound fired"
        );
        self.start_subsequent_leader_round();
    }

    /// Start the next round once both the previous round committed and
    /// ΔRound passed. Whichever comes first only sets the gate.
    pub(super) fn start_subsequent_leader_round(&mut self) {
        if !self.leader_state.ready_to_start_round {
            self.leader_state.ready_to_start_round = true;
            return;
        }

        if self.leader_state.phase == LeaderPhase::Querying {
            debug!("Query already in flight");
            return;
        }

        let seq_nr = self.follower_state.delivered_seq_nr + 1;
        let Some(ctx) = self.outcome_ctx(seq_nr) else {
            return;
        };

        self.leader_state.phase_before_query = self.leader_state.phase;
        self.leader_state.phase = LeaderPhase::Querying;

        let epoch = self.e;
        let plugin = self.deps.plugin.clone();
        let cancel = self.cancel.clone();
        let max_duration = self.config.public.max_duration_query();
        self.spawn_local(async move {
            let query = call_plugin(
                "Query",
                max_duration,
                Deadline::Soft,
                PLUGIN_WATCHDOG_GRACE,
                &cancel,
                plugin.query(&ctx),
            )
            .await;
            if cancel.is_cancelled() {
                return None;
            }
            Some(LocalEvent::QueryDone {
                epoch,
                seq_nr,
                query,
            })
        });
    }

    pub(super) fn event_query_done(&mut self, epoch: Epoch, seq_nr: SeqNr, query: Option<Query>) {
        if epoch != self.e
            || self.leader_state.phase != LeaderPhase::Querying
            || seq_nr != self.follower_state.delivered_seq_nr + 1
        {
            debug!(epoch, seq_nr, phase = ?self.leader_state.phase, "Dropping stale query result");
            return;
        }

        let Some(query) = query else {
            // the gate stays open; a later commit or the next epoch retries
            debug!(seq_nr, "Query failed, not starting round");
            self.leader_state.phase = self.leader_state.phase_before_query;
            return;
        };

        self.leader_state.query = query.clone();
        self.leader_state.observations.clear();

        self.leader_state
            .t_round
            .arm(self.config.public.delta_round());
        self.leader_state.ready_to_start_round = false;

        self.leader_state.phase = LeaderPhase::SentRoundStart;
        debug!(seq_nr, "Broadcasting RoundStart");
        self.broadcast(MessageToReportGeneration::RoundStart {
            epoch: self.e,
            seq_nr,
            query,
        });
    }

    pub(super) fn message_observation(
        &mut self,
        sender: OracleId,
        seq_nr: SeqNr,
        signed_observation: SignedObservation,
    ) {
        if self.l != self.id {
            warn!(sender, "Non-leader received Observation");
            return;
        }

        if !matches!(
            self.leader_state.phase,
            LeaderPhase::SentRoundStart | LeaderPhase::Grace
        ) {
            debug!(sender, phase = ?self.leader_state.phase, "Got Observation for wrong phase");
            return;
        }

        if seq_nr != self.follower_state.seq_nr {
            debug!(
                sender,
                msg_seq_nr = seq_nr,
                seq_nr = self.follower_state.seq_nr,
                "Got Observation with invalid seq_nr"
            );
            return;
        }

        if self.leader_state.observations.contains_key(&sender) {
            warn!(sender, seq_nr, "Got duplicate Observation");
            return;
        }

        let Some(public_key) = self.public_key(sender) else {
            return;
        };
        if let Err(e) =
            signed_observation.verify(&self.timestamp(), seq_nr, &self.leader_state.query, public_key)
        {
            warn!(sender, error = %e, "Observation carries invalid SignedObservation");
            return;
        }

        debug!(sender, seq_nr, "Got valid Observation");
        self.leader_state
            .observations
            .insert(sender, signed_observation);

        if self.leader_state.observations.len() == 2 * self.f() + 1 {
            debug!(seq_nr, "Starting observation grace period");
            self.leader_state.phase = LeaderPhase::Grace;
            self.leader_state
                .t_grace
                .arm(self.config.public.delta_grace());
        }
    }

    pub(super) fn event_t_grace_timeout(&mut self) {
        if self.leader_state.phase != LeaderPhase::Grace {
            error!(phase = ?self.leader_state.phase, "Leader's phase conflicts with TGrace timeout");
            return;
        }

        // BTreeMap iteration yields observers in ascending order
        let attributed_signed_observations: Vec<AttributedSignedObservation> = self
            .leader_state
            .observations
            .iter()
            .map(|(&observer, signed_observation)| AttributedSignedObservation {
                signed_observation: signed_observation.clone(),
                observer,
            })
            .collect();

        self.leader_state.phase = LeaderPhase::SentPropose;

        debug!(
            seq_nr = self.follower_state.seq_nr,
            observations = attributed_signed_observations.len(),
            "Broadcasting Propose"
        );
        self.broadcast(MessageToReportGeneration::Propose {
            epoch: self.e,
            seq_nr: self.follower_state.seq_nr,
            attributed_signed_observations,
        });
    }
}
