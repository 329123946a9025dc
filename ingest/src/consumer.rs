//! Bus consumer with automatic resubscription.
//!
//! [`EventConsumer`] owns the subscribe-process-reconnect loop so that
//! message handling code never has to care about transport failures. It
//! subscribes to a set of topics, feeds every delivered message to a
//! [`MessageHandler`], and when the subscription fails or the stream ends it
//! waits out the retry delay and subscribes again, indefinitely.
//!
//! ```text
//! loop {
//!     subscribe
//!         -> Ok(stream): hand each message to the handler until the
//!                        stream ends, then sleep and resubscribe
//!         -> Err: sleep and resubscribe
//! }
//! ```
//!
//! The loop only exits on a shutdown signal. Messages are processed one at a
//! time, in delivery order; the next message is not pulled from the stream
//! until the handler returns.

use async_trait::async_trait;
use depot_core::bus::{BusMessage, MessageBus, MessageStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default wait between subscription attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Processes one raw bus message.
///
/// Implementations absorb every per-message outcome: decode failures,
/// business rejections and store faults are logged and counted inside the
/// handler, never surfaced to the consumer loop. Returning means the message
/// is finished with, successfully or not, and the next one may be pulled.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a single delivered message.
    async fn handle(&self, message: &BusMessage);
}

/// Consumer that survives broker outages.
///
/// Holds the bus and handler behind trait objects so tests can swap in
/// in-memory implementations. One consumer processes its topics serially;
/// run several consumers for parallelism, never several handlers on one.
///
/// # Lifecycle
///
/// 1. Created via [`EventConsumer::new`]
/// 2. Moved into a background task via [`EventConsumer::spawn`]
/// 3. Runs until the shutdown channel fires
pub struct EventConsumer {
    /// Consumer name, used in every log line.
    name: String,

    /// Topics to subscribe to.
    topics: Vec<String>,

    /// Transport to consume from.
    bus: Arc<dyn MessageBus>,

    /// Destination for every delivered message.
    handler: Arc<dyn MessageHandler>,

    /// Shutdown signal receiver.
    shutdown: broadcast::Receiver<()>,

    /// Wait between subscription attempts.
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer with the default retry delay (5 seconds).
    ///
    /// # Arguments
    ///
    /// * `name` - Consumer name for logging (e.g. "ingest")
    /// * `topics` - Topics to subscribe to
    /// * `bus` - Message bus to consume from
    /// * `handler` - Handler invoked for every delivered message
    /// * `shutdown` - Broadcast receiver for graceful shutdown
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            bus,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the wait between subscription attempts.
    ///
    /// Tests use a few milliseconds here so reconnection paths run fast.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The returned handle resolves once the consumer has observed the
    /// shutdown signal and drained its current message.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-reconnect loop.
    async fn run(&mut self) {
        info!(consumer = %self.name, "consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "subscribed");

                            if self.process_stream(&mut stream).await == StreamEnd::Shutdown {
                                break;
                            }

                            warn!(
                                consumer = %self.name,
                                "stream ended, resubscribing in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "subscription failed, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "consumer stopped");
    }

    /// Drain the stream until it ends or shutdown is signalled.
    ///
    /// Transport errors on individual items are logged and skipped; they do
    /// not tear down the subscription.
    async fn process_stream(&mut self, stream: &mut MessageStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "consumer received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(message)) => {
                            self.handler.handle(&message).await;
                        }
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "transport error on stream");
                        }
                        None => {
                            return StreamEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

/// Why `process_stream` returned.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The shutdown channel fired; the consumer must stop.
    Shutdown,
    /// The stream ended; the consumer should resubscribe.
    Disconnected,
}
