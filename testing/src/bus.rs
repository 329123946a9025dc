//! In-memory implementation of the message bus for tests.
//!
//! [`InMemoryBus`] distributes published messages to subscribers over
//! per-topic Tokio broadcast channels. Two knobs make transport failure
//! reproducible:
//!
//! - [`InMemoryBus::set_subscriptions_failing`] makes every `subscribe`
//!   call fail until cleared, standing in for an unreachable broker.
//! - [`InMemoryBus::drop_subscribers`] closes every live subscription
//!   stream, standing in for a connection torn down mid-receive.
//!
//! Messages published while nobody is subscribed are lost, matching the
//! at-most-once contract of the production bus.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use depot_core::bus::{BusError, BusMessage, MessageBus, MessageStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, trace};

/// Broadcast capacity per topic.
const CHANNEL_CAPACITY: usize = 1024;

/// Buffer between the broadcast bridges and a subscriber's stream.
const SUBSCRIPTION_BUFFER: usize = 100;

/// In-memory [`MessageBus`] backed by broadcast channels.
///
/// Every subscriber receives every message on its topics; there is no
/// consumer-group load balancing. Cloning is cheap and all clones share
/// the same topics.
///
/// # Example
///
/// ```ignore
/// let bus = InMemoryBus::new();
/// let mut stream = bus.subscribe(&["device/new"]).await?;
/// bus.publish("device/new", br#"{"device_id":101}"#).await?;
/// let msg = stream.next().await;
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<BusMessage>>>>,
    failing: Arc<AtomicBool>,
    subscribe_attempts: Arc<AtomicU64>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(AtomicBool::new(false)),
            subscribe_attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every subsequent `subscribe` call fail (or succeed again).
    pub fn set_subscriptions_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Close every live subscription stream.
    ///
    /// Streams end rather than erroring, which is how a dropped broker
    /// connection surfaces to the consumer loop.
    pub async fn drop_subscribers(&self) {
        let mut topics = self.topics.write().await;
        topics.clear();
        debug!("dropped all subscriber channels");
    }

    /// Number of `subscribe` calls made so far, successful or not.
    #[must_use]
    pub fn subscribe_attempts(&self) -> u64 {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions attached to a topic.
    ///
    /// Spawned consumers subscribe asynchronously; tests poll this before
    /// publishing so the first message is not lost.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.write().await;
        if let Some(sender) = topics.get(topic) {
            sender.clone()
        } else {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            topics.insert(topic.to_string(), tx.clone());
            tx
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let message = BusMessage::new(topic, payload.to_vec());

        Box::pin(async move {
            let sender = self.sender_for(&message.topic).await;
            // No receivers is fine; the message is simply lost.
            let receivers = sender.send(message.clone()).map_or(0, |count| count);
            trace!(topic = %message.topic, receivers, "message published");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                return Err(BusError::SubscriptionFailed {
                    topics,
                    reason: "injected subscription failure".to_string(),
                });
            }

            let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

            // One bridge task per topic; the stream ends when every bridge
            // has exited and dropped its sender clone.
            for topic in &topics {
                let mut broadcast_rx = self.sender_for(topic).await.subscribe();
                let tx = tx.clone();
                let topic = topic.clone();

                tokio::spawn(async move {
                    loop {
                        match broadcast_rx.recv().await {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    debug!(topic = %topic, "subscriber dropped, bridge exiting");
                                    break;
                                }
                            },
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!(topic = %topic, "topic channel closed, bridge exiting");
                                break;
                            },
                            Err(broadcast::error::RecvError::Lagged(count)) => {
                                debug!(topic = %topic, lagged = count, "subscriber lagged, messages lost");
                            },
                        }
                    }
                });
            }
            drop(tx);

            let stream = async_stream::stream! {
                while let Some(message) = rx.recv().await {
                    yield Ok(message);
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
