//! Network transport traits.
//!
//! The protocol assumes an unreliable network: sends never fail from the
//! caller's point of view, messages may be dropped, delayed or reordered.
//! Serialization and peer discovery are the transport's business.

use async_trait::async_trait;
use ocr3_types::{Message, MessageWithSender, OracleId};
use std::sync::Arc;

/// Outbound half of the network.
///
/// # Thread Safety
///
/// Shared by every component of an oracle, so it must be `Send + Sync`.
pub trait NetworkSender: Send + Sync + 'static {
    /// Send a message to one oracle. Sending to ourselves is allowed.
    fn send_to(&self, msg: Message, to: OracleId);

    /// Send a message to every oracle, including ourselves.
    fn broadcast(&self, msg: Message);
}

/// An oracle's connection to the network.
#[async_trait]
pub trait NetworkEndpoint: Send + 'static {
    /// Handle for sending messages.
    fn sender(&self) -> Arc<dyn NetworkSender>;

    /// Receive the next inbound message.
    ///
    /// Returns `None` once the endpoint is closed.
    async fn receive(&mut self) -> Option<MessageWithSender>;
}
