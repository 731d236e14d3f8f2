//! Pub/Sub Exchange Abstraction
//!
//! The socket server is an external collaborator; the engine only needs its
//! exchange surface: publish a payload to a channel, subscribe to a channel,
//! and ask whether a subscription exists. Implementations deliver messages to
//! subscribers through an unbounded channel per subscription.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// An open subscription to one channel.
///
/// Messages arrive on `receiver` as the optional payloads the publisher sent.
/// The subscription stays registered until [`Exchange::unsubscribe`] is called
/// with its `id`.
#[derive(Debug)]
pub struct ChannelSubscription {
    /// Channel name this subscription listens on
    pub channel: String,
    /// Exchange-assigned subscription id, used to unsubscribe
    pub id: u64,
    /// Stream of published payloads
    pub receiver: mpsc::UnboundedReceiver<Option<Value>>,
}

/// Exchange surface of the pub/sub socket server.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Publish a payload to every subscriber of a channel
    async fn transmit_publish(&self, channel: &str, payload: Option<Value>) -> Result<()>;

    /// Open a subscription to a channel
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription>;

    /// Whether any subscription to the channel exists
    ///
    /// With `include_pending`, subscriptions still being established count.
    fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool;

    /// Close one subscription
    fn unsubscribe(&self, channel: &str, id: u64);
}
