//! Pacemaker: epoch changes and leader election.
//!
//! Each oracle broadcasts a wish to move to a new epoch when its leader
//! makes no progress for ΔProgress, or when Report Generation asks for a
//! leader change after `r_max` rounds. Wishes are amplified once F+1 oracles
//! agree and adopted once 2F+1 do.
//!
//! ```text
//!                    t_progress / ChangeLeader
//!   ┌─────────┐  ──────────────────────────────►  broadcast NewEpochWish(max(ne, e+1))
//!   │ epoch e │
//!   └─────────┘  ◄──────────────────────────────  > 2F wishes above e
//!                 adopt (2F+1)-th largest, notify Report Generation
//! ```

use std::sync::Arc;

use ocr3_config::SharedConfig;
use ocr3_core::NetworkSender;
use ocr3_crypto::prf;
use ocr3_types::{Epoch, MessageToPacemaker, MessageWithSender, OracleId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::events::{EventToPacemaker, EventToReportGeneration};
use crate::timeout::Timer;

/// Leader of `epoch`: `HMAC-SHA256(key, epoch_be) mod n`.
pub fn leader(epoch: Epoch, n: usize, key: &[u8; 16]) -> OracleId {
    let mac = prf(key, &[&epoch.to_be_bytes()]);
    // big-endian bytes reduced mod n without a bignum
    let n = n.max(1) as u128;
    let mut remainder = 0u128;
    for byte in mac {
        remainder = ((remainder << 8) | byte as u128) % n;
    }
    remainder as OracleId
}

/// Channels connecting the pacemaker to the rest of the oracle.
pub struct PacemakerChannels {
    /// NewEpochWish messages from the network
    pub from_net: mpsc::Receiver<MessageWithSender<MessageToPacemaker>>,
    /// Progress and ChangeLeader events
    pub from_report_generation: mpsc::Receiver<EventToPacemaker>,
    /// Epoch notifications
    pub to_report_generation: mpsc::Sender<EventToReportGeneration>,
}

/// Pacemaker state machine.
pub struct Pacemaker {
    config: Arc<SharedConfig>,
    id: OracleId,
    net: Arc<dyn NetworkSender>,
    channels: PacemakerChannels,
    cancel: CancellationToken,

    e: Epoch,
    l: OracleId,
    ne: Epoch,
    newepoch: Vec<Epoch>,
    notify_report_generation: bool,

    t_progress: Timer,
    t_resend: Timer,
}

impl Pacemaker {
    /// Create a pacemaker for oracle `id`.
    pub fn new(
        config: Arc<SharedConfig>,
        id: OracleId,
        net: Arc<dyn NetworkSender>,
        channels: PacemakerChannels,
        cancel: CancellationToken,
    ) -> Self {
        let n = config.public.n();
        Self {
            config,
            id,
            net,
            channels,
            cancel,
            e: 0,
            l: 0,
            ne: 0,
            newepoch: vec![0; n],
            notify_report_generation: false,
            t_progress: Timer::new(),
            t_resend: Timer::new(),
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> Epoch {
        self.e
    }

    /// Current leader.
    pub fn leader(&self) -> OracleId {
        self.l
    }

    /// Run until cancelled. `restored_epoch` is the epoch of the certificate
    /// restored from the database.
    pub async fn run(mut self, restored_epoch: Epoch) {
        self.start(restored_epoch);

        loop {
            let to_report_generation = self.channels.to_report_generation.clone();
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(msg) = self.channels.from_net.recv() => match msg.msg {
                    MessageToPacemaker::NewEpochWish { epoch } => {
                        self.message_new_epoch_wish(msg.sender, epoch)
                    }
                },

                Some(event) = self.channels.from_report_generation.recv() => match event {
                    EventToPacemaker::Progress => self.event_progress(),
                    EventToPacemaker::ChangeLeader => self.event_change_leader(),
                },

                _ = self.t_progress.fired() => {
                    debug!(epoch = self.e, leader = self.l, "TProgress fired");
                    self.event_change_leader();
                }

                _ = self.t_resend.fired() => self.send_new_epoch_wish(self.ne),

                Ok(permit) = to_report_generation.reserve(),
                    if self.notify_report_generation =>
                {
                    permit.send(EventToReportGeneration::StartNewEpoch { epoch: self.e });
                    self.notify_report_generation = false;
                }
            }
        }

        info!(epoch = self.e, leader = self.l, "Pacemaker: exiting");
    }

    fn start(&mut self, restored_epoch: Epoch) {
        info!(restored_epoch, "Running Pacemaker");

        self.e = 1;
        self.l = self.leader_of(self.e);
        self.ne = self.e;
        if restored_epoch >= self.e {
            self.ne = restored_epoch.saturating_add(1);
        }

        self.t_progress.arm(self.config.public.delta_progress());
        self.send_new_epoch_wish(self.ne);
        self.notify_report_generation = true;
    }

    fn leader_of(&self, epoch: Epoch) -> OracleId {
        leader(
            epoch,
            self.config.public.n(),
            &self.config.leader_selection_key(),
        )
    }

    fn send_new_epoch_wish(&mut self, epoch: Epoch) {
        debug!(epoch, ne = self.ne, "Broadcasting NewEpochWish");
        self.net
            .broadcast(MessageToPacemaker::NewEpochWish { epoch }.into());
        self.ne = epoch;
        self.t_resend.arm(self.config.public.delta_resend());
    }

    fn event_progress(&mut self) {
        self.t_progress.arm(self.config.public.delta_progress());
    }

    fn event_change_leader(&mut self) {
        self.t_progress.disarm();

        let Some(next) = self.e.checked_add(1) else {
            error!(epoch = self.e, "Epoch overflows, cannot change leader");
            return;
        };

        self.send_new_epoch_wish(self.ne.max(next));
    }

    fn message_new_epoch_wish(&mut self, sender: OracleId, epoch: Epoch) {
        let Some(previous) = self.newepoch.get_mut(sender as usize) else {
            debug!(sender, "NewEpochWish from unknown oracle");
            return;
        };
        if epoch <= *previous {
            debug!(sender, epoch, previous = *previous, "Ignoring stale NewEpochWish");
            return;
        }
        *previous = epoch;

        let f = self.config.public.f;

        let mut above_ne: Vec<Epoch> = self
            .newepoch
            .iter()
            .copied()
            .filter(|&wish| wish > self.ne)
            .collect();
        if above_ne.len() > f {
            above_ne.sort_unstable();
            let wish = above_ne[above_ne.len() - (f + 1)];
            debug!(wish, ne = self.ne, "F+1 oracles wish for a later epoch");
            self.send_new_epoch_wish(wish);
        }

        let mut above_e: Vec<Epoch> = self
            .newepoch
            .iter()
            .copied()
            .filter(|&wish| wish > self.e)
            .collect();
        if above_e.len() > 2 * f {
            above_e.sort_unstable();
            self.e = above_e[above_e.len() - (2 * f + 1)];
            self.l = self.leader_of(self.e);
            if self.ne < self.e {
                self.ne = self.e;
            }
            info!(epoch = self.e, leader = self.l, oracle_id = self.id, "Moving to new epoch");
            self.notify_report_generation = true;
            self.t_progress.arm(self.config.public.delta_progress());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_deterministic_and_in_range() {
        let key = [7u8; 16];
        for epoch in 0..200 {
            let l = leader(epoch, 7, &key);
            assert!(l < 7);
            assert_eq!(l, leader(epoch, 7, &key));
        }
    }

    #[test]
    fn test_leader_single_oracle() {
        assert_eq!(leader(42, 1, &[1u8; 16]), 0);
    }

    #[test]
    fn test_leader_matches_wide_integer_reduction() {
        let key = [3u8; 16];
        let mac = prf(&key, &[&9u64.to_be_bytes()]);
        let mut expected = 0u64;
        for byte in mac {
            expected = (expected * 256 + byte as u64) % 31;
        }
        assert_eq!(leader(9, 31, &key) as u64, expected);
    }

    #[test]
    fn test_leader_distribution_is_roughly_uniform() {
        let key = [0xabu8; 16];
        let n = 4;
        let mut counts = [0usize; 4];
        for epoch in 1..=4000 {
            counts[leader(epoch, n, &key) as usize] += 1;
        }
        for count in counts {
            assert!((800..=1200).contains(&count), "counts: {counts:?}");
        }
    }
}
