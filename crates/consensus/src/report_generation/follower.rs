//! Follower half of Report Generation. Every oracle, the leader included,
//! runs it.

use std::collections::HashSet;
use std::time::Duration;

use ocr3_types::{
    make_outcome_digest, make_outcome_inputs_digest, AttributedCommitSignature,
    AttributedObservation, AttributedPrepareSignature, AttributedSignedObservation,
    CertifiedCommit, CertifiedPrepare, CertifiedPrepareOrCommit, CommitSignature, Epoch,
    EpochStartProof, MessageToReportGeneration, Observation, OracleId, Outcome, OutcomeDigest,
    OutcomeInputsDigest, PrepareSignature, Query, SeqNr, SignedObservation,
};
use tracing::{debug, error, warn};

use super::{LocalEvent, ReportGeneration, POOL_CAPACITY};
use crate::events::{EventToPacemaker, EventToReportFinalization};
use crate::plugin_caller::{call_plugin, Deadline, PLUGIN_WATCHDOG_GRACE};
use crate::pool::Pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FollowerPhase {
    Unknown,
    NewEpoch,
    Ready,
    SentObserve,
    SentPrepare,
    SentCommit,
}

pub(super) struct FollowerState {
    pub(super) phase: FollowerPhase,
    pub(super) first_seq_nr_of_epoch: SeqNr,
    pub(super) seq_nr: SeqNr,

    round_start_pool: Pool<Query>,
    propose_pool: Pool<Vec<AttributedSignedObservation>>,
    prepare_pool: Pool<PrepareSignature>,
    commit_pool: Pool<CommitSignature>,

    query: Option<Query>,
    computing_outcome: bool,
    current_outcome_inputs_digest: OutcomeInputsDigest,
    current_outcome: Outcome,
    current_outcome_digest: OutcomeDigest,

    /// Highest certificate held; persisted before it is acted on
    pub(super) cert: CertifiedPrepareOrCommit,

    pub(super) delivered_seq_nr: SeqNr,
    pub(super) delivered_outcome: Outcome,
}

impl FollowerState {
    /// A restored commit counts as delivered, so a restart does not hand
    /// the same outcome to finalization twice. If the process stopped after
    /// persisting that commit but before finalization saw it, its reports
    /// are only attested once finalization fetches the certified commit from
    /// a peer that broadcast signatures for it.
    pub(super) fn new(restored_cert: CertifiedPrepareOrCommit) -> Self {
        let (delivered_seq_nr, delivered_outcome) = match &restored_cert {
            CertifiedPrepareOrCommit::Commit(commit) => (commit.seq_nr, commit.outcome.clone()),
            CertifiedPrepareOrCommit::Prepare(_) => (0, Outcome::new()),
        };
        Self {
            phase: FollowerPhase::Unknown,
            first_seq_nr_of_epoch: 0,
            seq_nr: 0,
            round_start_pool: Pool::new(POOL_CAPACITY),
            propose_pool: Pool::new(POOL_CAPACITY),
            prepare_pool: Pool::new(POOL_CAPACITY),
            commit_pool: Pool::new(POOL_CAPACITY),
            query: None,
            computing_outcome: false,
            current_outcome_inputs_digest: OutcomeInputsDigest::default(),
            current_outcome: Outcome::new(),
            current_outcome_digest: OutcomeDigest::default(),
            cert: restored_cert,
            delivered_seq_nr,
            delivered_outcome,
        }
    }

    pub(super) fn reset_for_epoch(&mut self) {
        self.phase = FollowerPhase::NewEpoch;
        self.first_seq_nr_of_epoch = 0;
        self.seq_nr = 0;
        self.query = None;
        self.computing_outcome = false;
        self.current_outcome_inputs_digest = OutcomeInputsDigest::default();
        self.current_outcome = Outcome::new();
        self.current_outcome_digest = OutcomeDigest::default();

        self.round_start_pool = Pool::new(POOL_CAPACITY);
        self.propose_pool = Pool::new(POOL_CAPACITY);
        self.prepare_pool = Pool::new(POOL_CAPACITY);
        self.commit_pool = Pool::new(POOL_CAPACITY);
    }

    fn reap_delivered(&mut self) {
        let delivered = self.delivered_seq_nr;
        self.round_start_pool.reap_delivered(delivered);
        self.propose_pool.reap_delivered(delivered);
        self.prepare_pool.reap_delivered(delivered);
        self.commit_pool.reap_delivered(delivered);
    }
}

/// Verify unverified entries at `seq_nr` and return `quorum` valid ones, if
/// there are that many.
fn collect_quorum<T: Clone>(
    pool: &mut Pool<T>,
    seq_nr: SeqNr,
    quorum: usize,
    kind: &'static str,
    verify: impl Fn(OracleId, &T) -> bool,
) -> Option<Vec<(OracleId, T)>> {
    let entries = pool.entries_mut(seq_nr)?;
    if entries.len() < quorum {
        return None;
    }

    for (&sender, entry) in entries.iter_mut() {
        if entry.verified.is_some() {
            continue;
        }
        let ok = verify(sender, &entry.item);
        entry.verified = Some(ok);
        if !ok {
            warn!(sender, seq_nr, "Got invalid {}", kind);
        }
    }

    let valid: Vec<(OracleId, T)> = entries
        .iter()
        .filter(|(_, entry)| entry.verified == Some(true))
        .take(quorum)
        .map(|(&sender, entry)| (sender, entry.item.clone()))
        .collect();

    (valid.len() == quorum).then_some(valid)
}

impl<RI> ReportGeneration<RI>
where
    RI: Clone + Send + Sync + 'static,
{
    pub(super) async fn message_epoch_start(&mut self, sender: OracleId, proof: EpochStartProof) {
        if sender != self.l {
            warn!(sender, "Non-leader sent EpochStart");
            return;
        }

        if self.follower_state.phase != FollowerPhase::NewEpoch {
            warn!(sender, phase = ?self.follower_state.phase, "Got EpochStart for wrong phase");
            return;
        }

        if let Err(e) = proof.verify(
            &self.timestamp(),
            &self.config.public.oracle_identities,
            self.byz_quorum_size(),
        ) {
            warn!(sender, error = %e, "EpochStart contains invalid EpochStartProof");
            return;
        }

        match proof.highest_certified {
            CertifiedPrepareOrCommit::Commit(commit) => {
                if !commit.is_genesis() && !self.deliver(commit).await {
                    return;
                }
                self.follower_state.first_seq_nr_of_epoch = self.follower_state.delivered_seq_nr + 1;
                self.start_subsequent_follower_round();
            }
            CertifiedPrepareOrCommit::Prepare(prepare) => {
                // re-proposal of an outcome prepared in a failed epoch
                let outcome_digest = make_outcome_digest(&prepare.outcome);
                let keyring = self.deps.offchain_keyring.clone();
                let signature = match PrepareSignature::make(
                    &self.timestamp(),
                    prepare.seq_nr,
                    &OutcomeInputsDigest::default(),
                    &outcome_digest,
                    |msg| keyring.offchain_sign(msg),
                ) {
                    Ok(signature) => signature,
                    Err(e) => {
                        error!(critical = true, error = %e, "Failed to sign Prepare");
                        return;
                    }
                };

                self.follower_state.phase = FollowerPhase::SentPrepare;
                self.follower_state.first_seq_nr_of_epoch = prepare.seq_nr + 1;
                self.follower_state.seq_nr = prepare.seq_nr;
                self.follower_state.current_outcome = prepare.outcome;
                self.follower_state.current_outcome_digest = outcome_digest;

                debug!(seq_nr = prepare.seq_nr, "Broadcasting Prepare (re-proposal)");
                self.broadcast(MessageToReportGeneration::Prepare {
                    epoch: self.e,
                    seq_nr: prepare.seq_nr,
                    signature,
                });
            }
        }
    }

    pub(super) fn start_subsequent_follower_round(&mut self) {
        let fs = &mut self.follower_state;
        fs.phase = FollowerPhase::Ready;
        fs.seq_nr = fs.delivered_seq_nr + 1;
        fs.query = None;
        fs.computing_outcome = false;
        fs.current_outcome = Outcome::new();
        fs.current_outcome_digest = OutcomeDigest::default();

        self.try_process_round_start_pool();
    }

    pub(super) fn message_round_start(&mut self, sender: OracleId, seq_nr: SeqNr, query: Query) {
        if sender != self.l {
            warn!(sender, "Non-leader sent RoundStart");
            return;
        }

        if let Err(reason) = self
            .follower_state
            .round_start_pool
            .put(seq_nr, sender, query)
        {
            warn!(sender, seq_nr, %reason, "Dropping RoundStart");
            return;
        }

        debug!(sender, seq_nr, "Pooled RoundStart");
        self.try_process_round_start_pool();
    }

    fn try_process_round_start_pool(&mut self) {
        if self.follower_state.phase != FollowerPhase::Ready {
            debug!(phase = ?self.follower_state.phase, "Cannot process RoundStart pool, wrong phase");
            return;
        }

        let seq_nr = self.follower_state.seq_nr;
        let Some(entry) = self.follower_state.round_start_pool.entry(seq_nr, self.l) else {
            debug!(seq_nr, "Cannot process RoundStart pool, no entry from leader");
            return;
        };

        if self.follower_state.query.is_some() {
            debug!(seq_nr, "Observation already requested");
            return;
        }

        let query = entry.item.clone();
        self.follower_state.query = Some(query.clone());

        let Some(ctx) = self.outcome_ctx(seq_nr) else {
            return;
        };

        let epoch = self.e;
        let plugin = self.deps.plugin.clone();
        let cancel = self.cancel.clone();
        let max_duration = self.config.public.max_duration_observation();
        self.spawn_local(async move {
            let observation = call_plugin(
                "Observation",
                max_duration,
                Deadline::Soft,
                PLUGIN_WATCHDOG_GRACE,
                &cancel,
                plugin.observation(&ctx, &query),
            )
            .await?;
            Some(LocalEvent::ObservationDone {
                epoch,
                seq_nr,
                observation,
            })
        });
    }

    pub(super) fn event_observation_done(&mut self, epoch: Epoch, seq_nr: SeqNr, observation: Observation) {
        if epoch != self.e
            || self.follower_state.phase != FollowerPhase::Ready
            || seq_nr != self.follower_state.seq_nr
        {
            debug!(epoch, seq_nr, "Dropping stale observation");
            return;
        }
        let Some(query) = self.follower_state.query.clone() else {
            return;
        };

        let ts = self.timestamp();
        let keyring = self.deps.offchain_keyring.clone();
        let signed_observation =
            match SignedObservation::make(&ts, seq_nr, &query, observation, |msg| {
                keyring.offchain_sign(msg)
            }) {
                Ok(signed_observation) => signed_observation,
                Err(e) => {
                    error!(seq_nr, error = %e, "Could not sign observation");
                    return;
                }
            };

        if let Err(e) = signed_observation.verify(&ts, seq_nr, &query, &keyring.offchain_public_key()) {
            error!(seq_nr, error = %e, "SignedObservation::make produced invalid signature");
            return;
        }

        self.follower_state.phase = FollowerPhase::SentObserve;
        debug!(seq_nr, leader = self.l, "Sending Observation to leader");
        self.send_to(
            MessageToReportGeneration::Observation {
                epoch: self.e,
                seq_nr,
                signed_observation,
            },
            self.l,
        );

        self.try_process_propose_pool();
    }

    pub(super) fn message_propose(
        &mut self,
        sender: OracleId,
        seq_nr: SeqNr,
        attributed_signed_observations: Vec<AttributedSignedObservation>,
    ) {
        if sender != self.l {
            warn!(sender, msg_seq_nr = seq_nr, "Non-leader sent Propose");
            return;
        }

        if let Err(reason) =
            self.follower_state
                .propose_pool
                .put(seq_nr, sender, attributed_signed_observations)
        {
            warn!(sender, seq_nr, %reason, "Dropping Propose");
            return;
        }

        debug!(sender, seq_nr, "Pooled Propose");
        self.try_process_propose_pool();
    }

    fn try_process_propose_pool(&mut self) {
        if self.follower_state.phase != FollowerPhase::SentObserve {
            debug!(phase = ?self.follower_state.phase, "Cannot process Propose pool, wrong phase");
            return;
        }
        if self.follower_state.computing_outcome {
            return;
        }

        let seq_nr = self.follower_state.seq_nr;
        let Some(entry) = self.follower_state.propose_pool.entry(seq_nr, self.l) else {
            return;
        };
        let attributed_signed_observations = entry.item.clone();

        if seq_nr <= self.follower_state.delivered_seq_nr {
            error!(
                critical = true,
                seq_nr,
                delivered_seq_nr = self.follower_state.delivered_seq_nr,
                "Propose contains invalid seq_nr"
            );
            return;
        }

        let Some(query) = self.follower_state.query.clone() else {
            return;
        };

        if attributed_signed_observations.len() <= 2 * self.f() {
            debug!(seq_nr, "Propose contains too few signed observations");
            return;
        }

        let ts = self.timestamp();
        let mut seen = HashSet::new();
        let mut attributed_observations = Vec::with_capacity(attributed_signed_observations.len());
        for aso in attributed_signed_observations {
            if aso.observer as usize >= self.n() {
                debug!(invalid_observer = aso.observer, "Propose contains observation with invalid observer");
                return;
            }
            if !seen.insert(aso.observer) {
                debug!(observer = aso.observer, "Propose contains duplicate observation");
                return;
            }
            let valid = self.public_key(aso.observer).is_some_and(|public_key| {
                aso.signed_observation
                    .verify(&ts, seq_nr, &query, public_key)
                    .is_ok()
            });
            if !valid {
                debug!(observer = aso.observer, "Propose contains observation with invalid signature");
                return;
            }
            attributed_observations.push(AttributedObservation {
                observation: aso.signed_observation.observation,
                observer: aso.observer,
            });
        }

        let outcome_inputs_digest = make_outcome_inputs_digest(
            &ts,
            &self.follower_state.delivered_outcome,
            seq_nr,
            &query,
            &attributed_observations,
        );

        let Some(ctx) = self.outcome_ctx(seq_nr) else {
            return;
        };

        self.follower_state.computing_outcome = true;

        let epoch = self.e;
        let plugin = self.deps.plugin.clone();
        let cancel = self.cancel.clone();
        self.spawn_local(async move {
            let outcome = call_plugin(
                "Outcome",
                Duration::ZERO,
                Deadline::Soft,
                PLUGIN_WATCHDOG_GRACE,
                &cancel,
                plugin.outcome(&ctx, &query, &attributed_observations),
            )
            .await?;
            Some(LocalEvent::OutcomeDone {
                epoch,
                seq_nr,
                outcome_inputs_digest,
                outcome,
            })
        });
    }

    pub(super) fn event_outcome_done(
        &mut self,
        epoch: Epoch,
        seq_nr: SeqNr,
        outcome_inputs_digest: OutcomeInputsDigest,
        outcome: Outcome,
    ) {
        if epoch != self.e
            || self.follower_state.phase != FollowerPhase::SentObserve
            || seq_nr != self.follower_state.seq_nr
        {
            debug!(epoch, seq_nr, "Dropping stale outcome");
            return;
        }

        let outcome_digest = make_outcome_digest(&outcome);
        let keyring = self.deps.offchain_keyring.clone();
        let signature = match PrepareSignature::make(
            &self.timestamp(),
            seq_nr,
            &outcome_inputs_digest,
            &outcome_digest,
            |msg| keyring.offchain_sign(msg),
        ) {
            Ok(signature) => signature,
            Err(e) => {
                error!(critical = true, error = %e, "Failed to sign Prepare");
                return;
            }
        };

        let fs = &mut self.follower_state;
        fs.phase = FollowerPhase::SentPrepare;
        fs.computing_outcome = false;
        fs.current_outcome_inputs_digest = outcome_inputs_digest;
        fs.current_outcome = outcome;
        fs.current_outcome_digest = outcome_digest;

        debug!(seq_nr, "Broadcasting Prepare");
        self.broadcast(MessageToReportGeneration::Prepare {
            epoch: self.e,
            seq_nr,
            signature,
        });
    }

    pub(super) async fn message_prepare(&mut self, sender: OracleId, seq_nr: SeqNr, signature: PrepareSignature) {
        if let Err(reason) = self.follower_state.prepare_pool.put(seq_nr, sender, signature) {
            debug!(sender, seq_nr, %reason, "Dropping Prepare");
            return;
        }

        debug!(sender, seq_nr, "Pooled Prepare");
        self.try_process_prepare_pool().await;
    }

    async fn try_process_prepare_pool(&mut self) {
        if self.follower_state.phase != FollowerPhase::SentPrepare {
            debug!(phase = ?self.follower_state.phase, "Cannot process Prepare pool, wrong phase");
            return;
        }

        let seq_nr = self.follower_state.seq_nr;
        let quorum = self.byz_quorum_size();
        let ts = self.timestamp();
        let inputs_digest = self.follower_state.current_outcome_inputs_digest;
        let outcome_digest = self.follower_state.current_outcome_digest;
        let identities = &self.config.public.oracle_identities;

        let Some(valid) = collect_quorum(
            &mut self.follower_state.prepare_pool,
            seq_nr,
            quorum,
            "Prepare",
            |sender, signature| {
                identities.get(sender as usize).is_some_and(|identity| {
                    signature
                        .verify(&ts, seq_nr, &inputs_digest, &outcome_digest, &identity.offchain_public_key)
                        .is_ok()
                })
            },
        ) else {
            return;
        };

        let keyring = self.deps.offchain_keyring.clone();
        let commit_signature = match CommitSignature::make(&ts, seq_nr, &outcome_digest, |msg| {
            keyring.offchain_sign(msg)
        }) {
            Ok(signature) => signature,
            Err(e) => {
                error!(critical = true, error = %e, "Failed to sign Commit");
                return;
            }
        };

        self.follower_state.cert = CertifiedPrepareOrCommit::Prepare(CertifiedPrepare {
            prepare_epoch: self.e,
            seq_nr,
            outcome_inputs_digest: inputs_digest,
            outcome: self.follower_state.current_outcome.clone(),
            prepare_quorum_certificate: valid
                .into_iter()
                .map(|(signer, signature)| AttributedPrepareSignature { signature, signer })
                .collect(),
        });
        if !self.persist_cert().await {
            return;
        }

        self.follower_state.phase = FollowerPhase::SentCommit;

        debug!(seq_nr, "Broadcasting Commit");
        self.broadcast(MessageToReportGeneration::Commit {
            epoch: self.e,
            seq_nr,
            signature: commit_signature,
        });
    }

    pub(super) async fn message_commit(&mut self, sender: OracleId, seq_nr: SeqNr, signature: CommitSignature) {
        if let Err(reason) = self.follower_state.commit_pool.put(seq_nr, sender, signature) {
            debug!(sender, seq_nr, %reason, "Dropping Commit");
            return;
        }

        debug!(sender, seq_nr, "Pooled Commit");
        self.try_process_commit_pool().await;
    }

    async fn try_process_commit_pool(&mut self) {
        if self.follower_state.phase != FollowerPhase::SentCommit {
            debug!(phase = ?self.follower_state.phase, "Cannot process Commit pool, wrong phase");
            return;
        }

        let seq_nr = self.follower_state.seq_nr;
        let quorum = self.byz_quorum_size();
        let ts = self.timestamp();
        let outcome_digest = self.follower_state.current_outcome_digest;
        let identities = &self.config.public.oracle_identities;

        let Some(valid) = collect_quorum(
            &mut self.follower_state.commit_pool,
            seq_nr,
            quorum,
            "Commit",
            |sender, signature| {
                identities.get(sender as usize).is_some_and(|identity| {
                    signature
                        .verify(&ts, seq_nr, &outcome_digest, &identity.offchain_public_key)
                        .is_ok()
                })
            },
        ) else {
            return;
        };

        let commit = CertifiedCommit {
            commit_epoch: self.e,
            seq_nr,
            outcome: self.follower_state.current_outcome.clone(),
            commit_quorum_certificate: valid
                .into_iter()
                .map(|(signer, signature)| AttributedCommitSignature { signature, signer })
                .collect(),
        };
        if !self.deliver(commit).await {
            return;
        }

        // a re-proposed seq_nr lies before first_seq_nr_of_epoch and counts as round 0
        let rounds_in_epoch = seq_nr
            .wrapping_sub(self.follower_state.first_seq_nr_of_epoch)
            .wrapping_add(1);
        if self.config.public.r_max <= rounds_in_epoch {
            debug!(seq_nr, rounds_in_epoch, "Epoch has been going on for too long, requesting leader change");
            self.send_to_pacemaker(EventToPacemaker::ChangeLeader).await;
            return;
        }

        debug!(seq_nr, "Sending Progress to Pacemaker");
        if !self.send_to_pacemaker(EventToPacemaker::Progress).await {
            return;
        }

        self.start_subsequent_follower_round();
        if self.id == self.l {
            self.start_subsequent_leader_round();
        }
    }

    /// Deliver a committed outcome. Returns false if the round has to be
    /// abandoned.
    pub(super) async fn deliver(&mut self, commit: CertifiedCommit) -> bool {
        let delivered = self.follower_state.delivered_seq_nr;
        if commit.seq_nr < delivered {
            error!(
                critical = true,
                commit_seq_nr = commit.seq_nr,
                delivered_seq_nr = delivered,
                "Assumption violation, commit seq_nr is less than delivered_seq_nr"
            );
            return false;
        }

        if commit.seq_nr == delivered {
            debug!(seq_nr = commit.seq_nr, "Skipping delivery of already delivered outcome");
        } else {
            self.follower_state.cert = CertifiedPrepareOrCommit::Commit(commit.clone());
            if !self.persist_cert().await {
                return false;
            }

            self.follower_state.delivered_seq_nr = commit.seq_nr;
            self.follower_state.delivered_outcome = commit.outcome.clone();

            debug!(seq_nr = commit.seq_nr, epoch = commit.commit_epoch, "Delivered outcome");

            if !self
                .send_to_report_finalization(EventToReportFinalization::CommittedOutcome {
                    certified_commit: commit,
                })
                .await
            {
                return false;
            }
        }

        self.follower_state.reap_delivered();
        true
    }

    /// Write the held certificate through to the database.
    async fn persist_cert(&self) -> bool {
        let timeout = self.local_config.database_timeout();
        let write = self
            .deps
            .database
            .write_cert(self.config.public.config_digest, Some(&self.follower_state.cert));
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Error persisting cert to database. Cannot safely continue current round.");
                false
            }
            Err(_) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out persisting cert to database. Cannot safely continue current round."
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_quorum_verifies_lazily() {
        let mut pool = Pool::new(10);
        for sender in 0..4u8 {
            pool.put(1, sender, sender).unwrap();
        }

        let calls = std::cell::Cell::new(0);
        let valid = collect_quorum(&mut pool, 1, 3, "Prepare", |sender, _| {
            calls.set(calls.get() + 1);
            sender != 1
        })
        .unwrap();
        assert_eq!(calls.get(), 4);
        assert_eq!(valid.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![0, 2, 3]);

        // cached results are reused
        let again = collect_quorum(&mut pool, 1, 3, "Prepare", |_, _| {
            calls.set(calls.get() + 1);
            true
        });
        assert!(again.is_some());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_collect_quorum_needs_enough_valid_entries() {
        let mut pool = Pool::new(10);
        for sender in 0..3u8 {
            pool.put(7, sender, ()).unwrap();
        }
        assert!(collect_quorum(&mut pool, 7, 3, "Commit", |sender, _| sender != 0).is_none());
        assert!(collect_quorum(&mut pool, 7, 4, "Commit", |_, _| true).is_none());
        assert!(collect_quorum(&mut pool, 8, 1, "Commit", |_, _| true).is_none());
    }

    #[test]
    fn test_restored_commit_counts_as_delivered() {
        let commit = CertifiedCommit {
            commit_epoch: 3,
            seq_nr: 9,
            outcome: b"nine".to_vec(),
            commit_quorum_certificate: vec![],
        };
        let state = FollowerState::new(CertifiedPrepareOrCommit::Commit(commit));
        assert_eq!(state.delivered_seq_nr, 9);
        assert_eq!(state.delivered_outcome, b"nine".to_vec());

        let state = FollowerState::new(CertifiedPrepareOrCommit::genesis());
        assert_eq!(state.delivered_seq_nr, 0);
        assert!(state.delivered_outcome.is_empty());
    }
}
