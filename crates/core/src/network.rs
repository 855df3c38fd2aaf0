//! In-process loopback network.
//!
//! Connects N oracles running in the same process through unbounded tokio
//! channels. Links can be cut and restored to simulate crashes and
//! partitions; a cut link silently drops messages, which is exactly the
//! failure model the protocol is built for.

use crate::traits::{NetworkEndpoint, NetworkSender};
use async_trait::async_trait;
use ocr3_types::{Message, MessageWithSender, OracleId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

struct Shared {
    inboxes: RwLock<Vec<mpsc::UnboundedSender<MessageWithSender>>>,
    // links[from][to]
    links: RwLock<Vec<Vec<bool>>>,
}

impl Shared {
    fn deliver(&self, from: OracleId, to: OracleId, msg: Message) {
        let up = self
            .links
            .read()
            .get(from as usize)
            .and_then(|row| row.get(to as usize).copied())
            .unwrap_or(false);
        if !up {
            trace!(from, to, "link down, dropping message");
            return;
        }
        if let Some(inbox) = self.inboxes.read().get(to as usize) {
            // a closed inbox means the receiving oracle is gone
            let _ = inbox.send(MessageWithSender::new(msg, from));
        }
    }
}

/// A fully connected in-process network of `n` oracles.
#[derive(Clone)]
pub struct LocalNetwork {
    shared: Arc<Shared>,
}

impl LocalNetwork {
    /// Create a network and one endpoint per oracle, indexed by oracle id.
    pub fn new(n: usize) -> (Self, Vec<LocalEndpoint>) {
        let mut inboxes = Vec::with_capacity(n);
        let mut receivers = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.push(tx);
            receivers.push(rx);
        }
        let shared = Arc::new(Shared {
            inboxes: RwLock::new(inboxes),
            links: RwLock::new(vec![vec![true; n]; n]),
        });
        let endpoints = receivers
            .into_iter()
            .enumerate()
            .map(|(id, receiver)| LocalEndpoint::new(id as OracleId, receiver, shared.clone()))
            .collect();
        (Self { shared }, endpoints)
    }

    /// Number of oracles on the network.
    pub fn n(&self) -> usize {
        self.shared.links.read().len()
    }

    /// Bring the directed link `from → to` up or down.
    pub fn set_link(&self, from: OracleId, to: OracleId, up: bool) {
        if let Some(link) = self
            .shared
            .links
            .write()
            .get_mut(from as usize)
            .and_then(|row| row.get_mut(to as usize))
        {
            *link = up;
        }
    }

    /// Cut (or restore) every link to and from `oracle`, except its loopback.
    pub fn isolate(&self, oracle: OracleId, isolated: bool) {
        let mut links = self.shared.links.write();
        let n = links.len();
        let i = oracle as usize;
        if i >= n {
            return;
        }
        for j in 0..n {
            if j != i {
                links[i][j] = !isolated;
                links[j][i] = !isolated;
            }
        }
    }

    /// Replace an oracle's inbox, returning a fresh endpoint.
    ///
    /// Used to restart a crashed oracle: messages queued for the old
    /// instance are discarded along with its receiver.
    pub fn reconnect(&self, oracle: OracleId) -> Option<LocalEndpoint> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inboxes = self.shared.inboxes.write();
        let slot = inboxes.get_mut(oracle as usize)?;
        *slot = tx;
        Some(LocalEndpoint::new(oracle, rx, self.shared.clone()))
    }
}

/// Sending half bound to one oracle id.
struct LocalSender {
    id: OracleId,
    shared: Arc<Shared>,
}

impl NetworkSender for LocalSender {
    fn send_to(&self, msg: Message, to: OracleId) {
        self.shared.deliver(self.id, to, msg);
    }

    fn broadcast(&self, msg: Message) {
        let n = self.shared.inboxes.read().len();
        for to in 0..n {
            self.shared.deliver(self.id, to as OracleId, msg.clone());
        }
    }
}

/// One oracle's view of a [`LocalNetwork`].
pub struct LocalEndpoint {
    id: OracleId,
    receiver: mpsc::UnboundedReceiver<MessageWithSender>,
    sender: Arc<LocalSender>,
}

impl LocalEndpoint {
    fn new(
        id: OracleId,
        receiver: mpsc::UnboundedReceiver<MessageWithSender>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            receiver,
            sender: Arc::new(LocalSender { id, shared }),
        }
    }

    /// Oracle id this endpoint belongs to.
    pub fn id(&self) -> OracleId {
        self.id
    }
}

#[async_trait]
impl NetworkEndpoint for LocalEndpoint {
    fn sender(&self) -> Arc<dyn NetworkSender> {
        self.sender.clone()
    }

    async fn receive(&mut self) -> Option<MessageWithSender> {
        self.receiver.recv().await
    }
}
