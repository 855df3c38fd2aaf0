//! Tests for the pacemaker: epoch wishes, view changes and epoch adoption.

use std::sync::Arc;
use std::time::Duration;

use ocr3_config::{PublicConfig, SharedConfig};
use ocr3_consensus::{
    leader, EventToPacemaker, EventToReportGeneration, Pacemaker, PacemakerChannels,
};
use ocr3_core::NetworkSender;
use ocr3_crypto::Ed25519PrivateKey;
use ocr3_types::{
    ConfigDigest, Epoch, Message, MessageToPacemaker, MessageWithSender, OracleId,
    OracleIdentity,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Records every message the pacemaker sends.
struct RecordingNetwork {
    tx: mpsc::UnboundedSender<(Option<OracleId>, Message)>,
}

impl NetworkSender for RecordingNetwork {
    fn send_to(&self, msg: Message, to: OracleId) {
        let _ = self.tx.send((Some(to), msg));
    }

    fn broadcast(&self, msg: Message) {
        let _ = self.tx.send((None, msg));
    }
}

fn shared_config(n: usize, f: usize) -> Arc<SharedConfig> {
    let oracle_identities = (0..n)
        .map(|i| OracleIdentity {
            offchain_public_key: Ed25519PrivateKey::from_bytes(&[i as u8 + 1; 32]).public_key(),
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
        r_max: 10,
        s: vec![1, 1, 2],
        oracle_identities,
        reporting_plugin_config: vec![],
        max_duration_query_ms: 500,
        max_duration_observation_ms: 500,
        max_duration_should_accept_finalized_report_ms: 500,
        max_duration_should_transmit_accepted_report_ms: 500,
        f,
        onchain_config: vec![],
        config_digest: ConfigDigest::new([7u8; 32]),
    };
    Arc::new(SharedConfig::new(public, [9u8; 16]).unwrap())
}

struct Harness {
    sent: mpsc::UnboundedReceiver<(Option<OracleId>, Message)>,
    from_net: mpsc::Sender<MessageWithSender<MessageToPacemaker>>,
    from_report_generation: mpsc::Sender<EventToPacemaker>,
    to_report_generation: mpsc::Receiver<EventToReportGeneration>,
    cancel: CancellationToken,
}

impl Harness {
    fn start(config: Arc<SharedConfig>, restored_epoch: Epoch) -> Self {
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let (from_net, from_net_rx) = mpsc::channel(16);
        let (from_report_generation, from_report_generation_rx) = mpsc::channel(16);
        let (to_report_generation_tx, to_report_generation) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let pacemaker = Pacemaker::new(
            config,
            0,
            Arc::new(RecordingNetwork { tx: sent_tx }),
            PacemakerChannels {
                from_net: from_net_rx,
                from_report_generation: from_report_generation_rx,
                to_report_generation: to_report_generation_tx,
            },
            cancel.clone(),
        );
        tokio::spawn(pacemaker.run(restored_epoch));

        Self {
            sent,
            from_net,
            from_report_generation,
            to_report_generation,
            cancel,
        }
    }

    async fn next_wish(&mut self) -> Epoch {
        loop {
            match self.sent.recv().await.expect("pacemaker stopped") {
                (None, Message::Pacemaker(MessageToPacemaker::NewEpochWish { epoch })) => {
                    return epoch
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    /// Skip resends of `epoch` until a different wish shows up.
    async fn next_wish_other_than(&mut self, epoch: Epoch) -> Epoch {
        loop {
            let wish = self.next_wish().await;
            if wish != epoch {
                return wish;
            }
        }
    }

    async fn wish_from(&self, sender: OracleId, epoch: Epoch) {
        self.from_net
            .send(MessageWithSender::new(
                MessageToPacemaker::NewEpochWish { epoch },
                sender,
            ))
            .await
            .unwrap();
    }

    async fn next_epoch(&mut self) -> Epoch {
        match self.to_report_generation.recv().await.expect("pacemaker stopped") {
            EventToReportGeneration::StartNewEpoch { epoch } => epoch,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_wishes_first_epoch() {
    let mut harness = Harness::start(shared_config(4, 1), 0);

    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_epoch().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_after_restore_wishes_past_restored_epoch() {
    let mut harness = Harness::start(shared_config(4, 1), 5);

    assert_eq!(harness.next_wish().await, 6);
    // the epoch itself only moves once a quorum agrees
    assert_eq!(harness.next_epoch().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resends_wish_every_delta_resend() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    let start = Instant::now();

    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_progress_timeout_wishes_next_epoch() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    let start = Instant::now();

    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_wish_other_than(1).await, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_progress_postpones_view_change() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    let start = Instant::now();

    let progress = harness.from_report_generation.clone();
    tokio::spawn(async move {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            progress.send(EventToPacemaker::Progress).await.unwrap();
        }
    });

    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_wish_other_than(1).await, 2);
    // last progress at 15 s, plus ΔProgress
    assert_eq!(start.elapsed(), Duration::from_secs(23));
}

#[tokio::test(start_paused = true)]
async fn test_change_leader_wishes_next_epoch_immediately() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    let start = Instant::now();
    assert_eq!(harness.next_wish().await, 1);

    harness
        .from_report_generation
        .send(EventToPacemaker::ChangeLeader)
        .await
        .unwrap();

    assert_eq!(harness.next_wish().await, 2);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_amplifies_after_f_plus_one_wishes() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_epoch().await, 1);

    harness.wish_from(1, 3).await;
    harness.wish_from(2, 3).await;

    assert_eq!(harness.next_wish().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_adopts_epoch_after_byzantine_quorum_of_wishes() {
    let config = shared_config(4, 1);
    let mut harness = Harness::start(config.clone(), 0);
    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_epoch().await, 1);

    // (2f+1)-th largest of {3, 4, 5} is 3
    harness.wish_from(1, 3).await;
    harness.wish_from(2, 4).await;
    harness.wish_from(3, 5).await;

    assert_eq!(harness.next_epoch().await, 3);
    assert!(leader(3, 4, &config.leader_selection_key()) < 4);
}

#[tokio::test(start_paused = true)]
async fn test_ignores_stale_and_unknown_wishes() {
    let mut harness = Harness::start(shared_config(4, 1), 0);
    assert_eq!(harness.next_wish().await, 1);
    assert_eq!(harness.next_epoch().await, 1);

    // repeated wishes from one oracle count once
    harness.wish_from(1, 4).await;
    harness.wish_from(1, 4).await;
    harness.wish_from(1, 3).await;
    // sender outside the committee
    harness.wish_from(9, 4).await;

    // the only thing that happens is the resend of our own wish
    assert_eq!(harness.next_wish().await, 1);
    assert!(harness.to_report_generation.try_recv().is_err());
}
