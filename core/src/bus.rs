//! Message bus abstraction for the ingestion pipeline.
//!
//! This module provides the [`MessageBus`] trait, the seam between the
//! consumer loop and the concrete broker client. Subscribing yields a
//! [`MessageStream`] of raw (topic, payload) pairs; decoding and validation
//! happen downstream, so a malformed payload can never poison the transport.
//!
//! # Delivery Semantics
//!
//! Delivery is **at-most-once**: a message handed to the stream counts as
//! consumed whether or not the caller handles it successfully. There is no
//! per-message retry and no dead-letter mechanism; a dropped message is
//! gone from this pipeline's perspective.
//!
//! # Implementations
//!
//! - `depot_redpanda::RedpandaBus` for production (Kafka-compatible broker)
//! - `depot_testing::InMemoryBus` for tests (fast, failure-injectable)
//!
//! # Example
//!
//! ```rust,ignore
//! use depot_core::bus::{BusMessage, MessageBus};
//! use futures::StreamExt;
//!
//! async fn example(bus: &dyn MessageBus) {
//!     let mut stream = bus.subscribe(&["device/new", "assignment/issue"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(msg) => println!("{}: {} bytes", msg.topic, msg.payload.len()),
//!             Err(e) => eprintln!("stream error: {e}"),
//!         }
//!     }
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to reach the broker
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to topics
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message to a topic
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or protocol error while receiving
    #[error("transport error: {0}")]
    TransportError(String),
}

/// A raw message as delivered by the bus.
///
/// The payload is untrusted bytes (JSON by convention); the topic is kept
/// alongside it because routing happens after delivery, not at subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Raw payload bytes, not yet validated.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Create a message from a topic and payload.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of raw messages from a subscription.
///
/// Each item is either a delivered message or a transport error. Transport
/// errors may be transient; terminal failure is signalled by the stream
/// ending, at which point the consumer loop resubscribes.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the consumer loop holds the bus
/// as `Arc<dyn MessageBus>` for the process lifetime.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of using
/// `async fn` so the trait stays usable as a trait object.
pub trait MessageBus: Send + Sync {
    /// Publish one message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker does not accept
    /// the message.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of raw messages.
    ///
    /// The returned stream delivers messages from all subscribed topics in
    /// broker order, at most once each.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot
    /// be established; the caller is expected to retry after a delay.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_message_new_accepts_str_and_bytes() {
        let msg = BusMessage::new("device/new", br#"{"device_id":1}"#.to_vec());
        assert_eq!(msg.topic, "device/new");
        assert_eq!(msg.payload, br#"{"device_id":1}"#);
    }

    #[test]
    fn bus_error_display_is_human_readable() {
        let err = BusError::SubscriptionFailed {
            topics: vec!["device/new".to_string()],
            reason: "broker unreachable".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("device/new"));
        assert!(text.contains("broker unreachable"));
    }
}
