//! In-Process Exchange
//!
//! A complete [`Exchange`] implementation over process memory, used by tests
//! and single-process deployments. Publications fan out to every live
//! subscription of the channel; closed receivers are pruned on the next
//! publish.

use crate::socket::exchange::{ChannelSubscription, Exchange};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Option<Value>>,
}

/// In-process pub/sub exchange.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::socket::{Exchange, LocalExchange};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let exchange = LocalExchange::new();
/// let mut subscription = exchange.subscribe("crud>Item/i1").await?;
///
/// exchange.transmit_publish("crud>Item/i1", Some(json!({"type": "update"}))).await?;
/// let message = subscription.receiver.recv().await.unwrap();
/// assert_eq!(message, Some(json!({"type": "update"})));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LocalExchange {
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl LocalExchange {
    /// Create an empty exchange
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a channel (testing aid)
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().expect("exchange lock poisoned");
        channels.get(channel).map(|subs| subs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Exchange for LocalExchange {
    async fn transmit_publish(&self, channel: &str, payload: Option<Value>) -> Result<()> {
        let mut channels = self.channels.lock().expect("exchange lock poisoned");
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|subscriber| subscriber.sender.send(payload.clone()).is_ok());
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.lock().expect("exchange lock poisoned");
        channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        Ok(ChannelSubscription {
            channel: channel.to_string(),
            id,
            receiver,
        })
    }

    fn is_subscribed(&self, channel: &str, _include_pending: bool) -> bool {
        let channels = self.channels.lock().expect("exchange lock poisoned");
        channels
            .get(channel)
            .map(|subs| !subs.is_empty())
            .unwrap_or(false)
    }

    fn unsubscribe(&self, channel: &str, id: u64) {
        let mut channels = self.channels.lock().expect("exchange lock poisoned");
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|subscriber| subscriber.id != id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }
}
