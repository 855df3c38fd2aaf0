//! Tests for report generation: a full committee of report generation
//! instances wired through the local network, with epochs started by hand.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ocr3_config::{LocalConfig, PublicConfig, SharedConfig};
use ocr3_consensus::{
    EventToPacemaker, EventToReportFinalization, EventToReportGeneration, ReportGeneration,
    ReportGenerationChannels, ReportGenerationDeps,
};
use ocr3_core::{Database, Ed25519OffchainKeyring, LocalNetwork, NetworkEndpoint, ReportingPlugin};
use ocr3_crypto::Ed25519PrivateKey;
use ocr3_storage::MemoryDatabase;
use ocr3_types::{
    make_outcome_digest, AttributedCommitSignature, AttributedObservation,
    AttributedPrepareSignature, CertifiedCommit, CertifiedPrepare, CertifiedPrepareOrCommit,
    CommitSignature, ConfigDigest, Message, MessageWithSender, Observation, OracleId,
    OracleIdentity, Outcome, OutcomeContext, OutcomeInputsDigest, PrepareSignature, Query,
    ReportPlus, ReportWithInfo, ReportingPluginInfo, SeqNr, Timestamp,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const N: usize = 4;
const F: usize = 1;
const WAIT: Duration = Duration::from_secs(30);

fn counter(outcome: &[u8]) -> u64 {
    <[u8; 8]>::try_from(outcome)
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

/// Agrees on a counter that increments by one per round.
struct IncrementPlugin;

#[async_trait]
impl ReportingPlugin<()> for IncrementPlugin {
    fn info(&self) -> ReportingPluginInfo {
        ReportingPluginInfo {
            name: "increment".to_string(),
            limits: Default::default(),
        }
    }

    async fn query(&self, _ctx: &OutcomeContext) -> anyhow::Result<Query> {
        Ok(vec![])
    }

    async fn observation(&self, ctx: &OutcomeContext, _query: &[u8]) -> anyhow::Result<Observation> {
        Ok(ctx.seq_nr.to_be_bytes().to_vec())
    }

    async fn outcome(
        &self,
        ctx: &OutcomeContext,
        _query: &[u8],
        attributed_observations: &[AttributedObservation],
    ) -> anyhow::Result<Outcome> {
        anyhow::ensure!(
            attributed_observations.len() > 2 * F,
            "only {} observations",
            attributed_observations.len()
        );
        Ok((counter(&ctx.previous_outcome) + 1).to_be_bytes().to_vec())
    }

    async fn reports(&self, _seq_nr: SeqNr, _outcome: &[u8]) -> anyhow::Result<Vec<ReportPlus<()>>> {
        Ok(vec![])
    }

    async fn should_accept_finalized_report(
        &self,
        _seq_nr: SeqNr,
        _report: &ReportWithInfo<()>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn should_transmit_accepted_report(
        &self,
        _seq_nr: SeqNr,
        _report: &ReportWithInfo<()>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

fn offchain_key(i: usize) -> Ed25519PrivateKey {
    Ed25519PrivateKey::from_bytes(&[i as u8 + 1; 32])
}

fn shared_config(r_max: u64) -> Arc<SharedConfig> {
    let oracle_identities = (0..N)
        .map(|i| OracleIdentity {
            offchain_public_key: offchain_key(i).public_key(),
            onchain_public_key: vec![i as u8; 20],
            peer_id: format!("peer-{i}"),
            transmit_account: format!("0x{i:040x}"),
        })
        .collect();
    let public = PublicConfig {
        delta_progress_ms: 8_000,
        delta_resend_ms: 5_000,
        delta_initial_ms: 3_000,
        delta_round_ms: 1_000,
        delta_grace_ms: 200,
        delta_certified_commit_request_ms: 500,
        delta_stage_ms: 2_000,
        r_max,
        s: vec![1, 1, 2],
        oracle_identities,
        reporting_plugin_config: vec![],
        max_duration_query_ms: 500,
        max_duration_observation_ms: 500,
        max_duration_should_accept_finalized_report_ms: 500,
        max_duration_should_transmit_accepted_report_ms: 500,
        f: F,
        onchain_config: vec![],
        config_digest: ConfigDigest::new([3u8; 32]),
    };
    Arc::new(SharedConfig::new(public, [4u8; 16]).unwrap())
}

fn certified_commit(config: &SharedConfig, epoch: u64, seq_nr: SeqNr, outcome: &[u8]) -> CertifiedCommit {
    let ts = Timestamp::new(config.public.config_digest, epoch);
    let outcome_digest = make_outcome_digest(outcome);
    let commit_quorum_certificate = (0..config.public.byz_quorum_size())
        .map(|i| AttributedCommitSignature {
            signature: CommitSignature::make(&ts, seq_nr, &outcome_digest, |msg| {
                Ok::<_, Infallible>(offchain_key(i).sign(msg))
            })
            .unwrap(),
            signer: i as OracleId,
        })
        .collect();
    CertifiedCommit {
        commit_epoch: epoch,
        seq_nr,
        outcome: outcome.to_vec(),
        commit_quorum_certificate,
    }
}

/// A prepare certificate from a normal round of `epoch` whose commit
/// phase never finished.
fn certified_prepare(config: &SharedConfig, epoch: u64, seq_nr: SeqNr, outcome: &[u8]) -> CertifiedPrepare {
    let ts = Timestamp::new(config.public.config_digest, epoch);
    let outcome_inputs_digest = OutcomeInputsDigest([8u8; 32]);
    let outcome_digest = make_outcome_digest(outcome);
    let prepare_quorum_certificate = (0..config.public.byz_quorum_size())
        .map(|i| AttributedPrepareSignature {
            signature: PrepareSignature::make(&ts, seq_nr, &outcome_inputs_digest, &outcome_digest, |msg| {
                Ok::<_, Infallible>(offchain_key(i).sign(msg))
            })
            .unwrap(),
            signer: i as OracleId,
        })
        .collect();
    CertifiedPrepare {
        prepare_epoch: epoch,
        seq_nr,
        outcome_inputs_digest,
        outcome: outcome.to_vec(),
        prepare_quorum_certificate,
    }
}

/// Every oracle's report generation, without pacemakers.
struct Committee {
    config: Arc<SharedConfig>,
    databases: Vec<Arc<MemoryDatabase>>,
    start_epoch: Vec<mpsc::Sender<EventToReportGeneration>>,
    to_pacemaker: Vec<mpsc::Receiver<EventToPacemaker>>,
    delivered: Vec<mpsc::Receiver<EventToReportFinalization>>,
    cancel: CancellationToken,
}

impl Committee {
    async fn start(config: Arc<SharedConfig>, restored: CertifiedPrepareOrCommit) -> Self {
        let (_network, endpoints) = LocalNetwork::new(N);
        let cancel = CancellationToken::new();
        let mut committee = Committee {
            config: config.clone(),
            databases: Vec::new(),
            start_epoch: Vec::new(),
            to_pacemaker: Vec::new(),
            delivered: Vec::new(),
            cancel: cancel.clone(),
        };

        for (i, mut endpoint) in endpoints.into_iter().enumerate() {
            let database = Arc::new(MemoryDatabase::new());
            database
                .write_cert(config.public.config_digest, Some(&restored))
                .await
                .unwrap();

            let (from_net_tx, from_net) = mpsc::channel(64);
            let (start_epoch, from_pacemaker) = mpsc::channel(8);
            let (to_pacemaker, to_pacemaker_rx) = mpsc::channel(64);
            let (to_report_finalization, delivered) = mpsc::channel(64);

            let report_generation = ReportGeneration::new(
                config.clone(),
                LocalConfig::default(),
                i as OracleId,
                ReportGenerationDeps {
                    net: endpoint.sender(),
                    database: database.clone(),
                    offchain_keyring: Arc::new(Ed25519OffchainKeyring::new(offchain_key(i))),
                    plugin: Arc::new(IncrementPlugin),
                },
                ReportGenerationChannels {
                    from_net,
                    from_pacemaker,
                    to_pacemaker,
                    to_report_finalization,
                },
                cancel.child_token(),
                restored.clone(),
            );
            tokio::spawn(report_generation.run());

            // only report generation traffic is routed
            let router_cancel = cancel.child_token();
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = router_cancel.cancelled() => break,
                        received = endpoint.receive() => received,
                    };
                    let Some(MessageWithSender { msg, sender }) = received else {
                        break;
                    };
                    if let Message::ReportGeneration(msg) = msg {
                        if from_net_tx.send(MessageWithSender::new(msg, sender)).await.is_err() {
                            break;
                        }
                    }
                }
            });

            committee.databases.push(database);
            committee.start_epoch.push(start_epoch);
            committee.to_pacemaker.push(to_pacemaker_rx);
            committee.delivered.push(delivered);
        }
        committee
    }

    async fn start_epoch(&self, epoch: u64) {
        for tx in &self.start_epoch {
            tx.send(EventToReportGeneration::StartNewEpoch { epoch })
                .await
                .unwrap();
        }
    }

    async fn next_delivery(&mut self, id: usize) -> CertifiedCommit {
        let event = tokio::time::timeout(WAIT, self.delivered[id].recv())
            .await
            .expect("no delivery in time")
            .expect("report generation stopped");
        let EventToReportFinalization::CommittedOutcome { certified_commit } = event;
        certified_commit
    }

    async fn next_pacemaker_event(&mut self, id: usize) -> EventToPacemaker {
        tokio::time::timeout(WAIT, self.to_pacemaker[id].recv())
            .await
            .expect("no pacemaker event in time")
            .expect("report generation stopped")
    }
}

impl Drop for Committee {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test(start_paused = true)]
async fn test_committee_delivers_agreed_outcomes_in_order() {
    let mut committee = Committee::start(shared_config(3), CertifiedPrepareOrCommit::genesis()).await;
    committee.start_epoch(1).await;

    for id in 0..N {
        for seq_nr in 1..=3 {
            let commit = committee.next_delivery(id).await;
            assert_eq!(commit.seq_nr, seq_nr, "oracle {id}");
            assert_eq!(commit.commit_epoch, 1);
            assert_eq!(counter(&commit.outcome), seq_nr);
            commit
                .verify(
                    committee.config.public.config_digest,
                    &committee.config.public.oracle_identities,
                    committee.config.public.byz_quorum_size(),
                )
                .unwrap();
        }
    }

    // r_max rounds later the epoch asks for a new leader
    for id in 0..N {
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::Progress);
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::Progress);
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::ChangeLeader);
    }

    // the last commit is persisted before it is delivered
    let digest = committee.config.public.config_digest;
    for database in &committee.databases {
        match database.read_cert(digest).await.unwrap() {
            Some(CertifiedPrepareOrCommit::Commit(commit)) => assert_eq!(commit.seq_nr, 3),
            other => panic!("unexpected persisted cert {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_epoch_continues_after_committed_rounds() {
    let mut committee = Committee::start(shared_config(2), CertifiedPrepareOrCommit::genesis()).await;
    committee.start_epoch(1).await;

    for id in 0..N {
        assert_eq!(committee.next_delivery(id).await.seq_nr, 1);
        assert_eq!(committee.next_delivery(id).await.seq_nr, 2);
    }

    // no further rounds once the epoch is exhausted
    let stalled = tokio::time::timeout(Duration::from_secs(10), committee.delivered[0].recv()).await;
    assert!(stalled.is_err());

    committee.start_epoch(2).await;
    for id in 0..N {
        let commit = committee.next_delivery(id).await;
        assert_eq!(commit.seq_nr, 3);
        assert_eq!(commit.commit_epoch, 2);
        assert_eq!(counter(&commit.outcome), 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_restored_commit_is_not_delivered_again() {
    let config = shared_config(10);
    let restored = certified_commit(&config, 1, 5, &5u64.to_be_bytes());
    let mut committee = Committee::start(config, CertifiedPrepareOrCommit::Commit(restored)).await;
    committee.start_epoch(2).await;

    for id in 0..N {
        let commit = committee.next_delivery(id).await;
        assert_eq!(commit.seq_nr, 6, "oracle {id}");
        assert_eq!(counter(&commit.outcome), 6);
    }
}

#[tokio::test(start_paused = true)]
async fn test_prepared_outcome_is_reproposed_in_next_epoch() {
    let config = shared_config(3);
    let prepared = certified_prepare(&config, 1, 1, &1u64.to_be_bytes());
    let mut committee = Committee::start(config, CertifiedPrepareOrCommit::Prepare(prepared)).await;
    committee.start_epoch(2).await;

    for id in 0..N {
        // committed in the new epoch; followers only reach a commit quorum
        // if they all signed the prepare with an empty inputs digest
        let reproposed = committee.next_delivery(id).await;
        assert_eq!(reproposed.seq_nr, 1, "oracle {id}");
        assert_eq!(reproposed.commit_epoch, 2);
        assert_eq!(counter(&reproposed.outcome), 1);
        reproposed
            .verify(
                committee.config.public.config_digest,
                &committee.config.public.oracle_identities,
                committee.config.public.byz_quorum_size(),
            )
            .unwrap();

        // normal rounds continue from the re-proposed outcome
        for seq_nr in 2..=4 {
            let commit = committee.next_delivery(id).await;
            assert_eq!(commit.seq_nr, seq_nr, "oracle {id}");
            assert_eq!(counter(&commit.outcome), seq_nr);
        }
    }

    // the re-proposal does not count against r_max
    for id in 0..N {
        for _ in 0..3 {
            assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::Progress);
        }
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::ChangeLeader);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reproposal_keeps_epoch_going_with_single_round() {
    let config = shared_config(1);
    let prepared = certified_prepare(&config, 1, 1, &1u64.to_be_bytes());
    let mut committee = Committee::start(config, CertifiedPrepareOrCommit::Prepare(prepared)).await;
    committee.start_epoch(2).await;

    for id in 0..N {
        assert_eq!(committee.next_delivery(id).await.seq_nr, 1);
        assert_eq!(committee.next_delivery(id).await.seq_nr, 2);
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::Progress);
        assert_eq!(committee.next_pacemaker_event(id).await, EventToPacemaker::ChangeLeader);
    }

    let stalled = tokio::time::timeout(Duration::from_secs(10), committee.delivered[0].recv()).await;
    assert!(stalled.is_err());
}
