//! Kafka-compatible message bus implementation for the depot pipeline.
//!
//! This crate provides [`RedpandaBus`], the production implementation of the
//! [`MessageBus`] trait from `depot-core`, built on rdkafka. It works against
//! Redpanda, Apache Kafka, or any other broker speaking the Kafka protocol.
//!
//! # Delivery Semantics
//!
//! **At-most-once.** The consumer runs with auto-commit enabled: offsets
//! advance whether or not the application handles a delivered message
//! successfully. A message lost to a mid-handling crash is not redelivered,
//! and a handled message is never knowingly reprocessed. This mirrors QoS-0
//! consumption and is what the ingestion pipeline is designed around; it is
//! deliberately weaker than the at-least-once setups that commit after
//! processing.
//!
//! Payloads pass through untouched as raw bytes. Decoding is the consumer's
//! job, so one unparseable message can never wedge the transport.
//!
//! # Example
//!
//! ```no_run
//! use depot_redpanda::RedpandaBus;
//! use depot_core::bus::MessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("depot-ingest")
//!     .build()?;
//!
//! let mut stream = bus.subscribe(&["device.new", "assignment.issue"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(msg) => println!("{}: {} bytes", msg.topic, msg.payload.len()),
//!         Err(e) => eprintln!("stream error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use depot_core::bus::{BusError, BusMessage, MessageBus, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-compatible [`MessageBus`] implementation.
///
/// One value serves both directions: `publish` goes through a shared
/// [`FutureProducer`], and every `subscribe` call creates its own
/// [`StreamConsumer`] owned by a forwarder task, so a subscription survives
/// for exactly as long as its stream is held.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Consumer group**: explicit id, or derived from the subscribed topics
/// - **Buffer size**: in-flight message buffer per subscription (default 1000)
/// - **Offset reset**: where a new group starts reading (default "latest")
pub struct RedpandaBus {
    /// Producer for publishing messages
    producer: FutureProducer,
    /// Broker addresses (consumers are created per subscription)
    brokers: String,
    /// Producer send timeout
    timeout: Duration,
    /// Consumer group id (if explicitly set)
    consumer_group: Option<String>,
    /// Message buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaBus`].
///
/// # Example
///
/// ```no_run
/// use depot_redpanda::RedpandaBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("depot-ingest")
///     .buffer_size(500)
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses as a comma-separated list.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group id used by subscriptions.
    ///
    /// If unset, the group id is derived from the sorted topic names so
    /// repeated runs of the same service land in the same group.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the per-subscription message buffer size. Default: 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a consumer group with no committed offset starts reading:
    /// `"earliest"`, `"latest"` (default), or `"error"`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers were not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "1")
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "message bus created"
        );

        Ok(RedpandaBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl MessageBus for RedpandaBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::<(), _>::to(&topic).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        "message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted = topics.clone();
                sorted.sort();
                format!("depot-{}", sorted.join("-"))
            });

            // Auto-commit keeps delivery at-most-once: offsets advance on
            // receipt, not on successful handling.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "true")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group_id,
                buffer_size = buffer_size,
                "subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The forwarder task owns the consumer; it ends when the
            // receiver side of the channel is dropped.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let item = match msg_result {
                        Ok(message) => {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "message received"
                            );
                            // A keyed message with no payload still reaches
                            // the decoder, which rejects it as malformed.
                            Ok(BusMessage::new(
                                message.topic(),
                                message.payload().unwrap_or_default().to_vec(),
                            ))
                        },
                        Err(e) => Err(BusError::TransportError(format!(
                            "failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(item).await.is_err() {
                        tracing::debug!("subscriber dropped, exiting forwarder task");
                        break;
                    }
                }

                tracing::debug!("forwarder task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
