//! Topic routing and per-message outcome handling.
//!
//! [`Dispatcher`] is the single [`MessageHandler`] behind the ingest
//! consumer. For every delivered message it resolves the topic to an event
//! kind, decodes the payload, and invokes the matching handler. Every
//! outcome is absorbed here:
//!
//! - applied mutations are counted
//! - undecodable payloads are dropped with a warning that includes the raw
//!   payload, so the message is not lost silently
//! - business rejections are dropped with the rejection reason
//! - store failures are dropped with an error log
//!
//! Dropping is deliberate: delivery is at-most-once and there is no
//! dead-letter queue, so a message that cannot be applied now will never be
//! applied. The logs and counters are the only trace it leaves.

use crate::config::TopicConfig;
use crate::consumer::MessageHandler;
use crate::decode::{self, DecodeError, DecodedEvent, EventKind};
use crate::handlers::{GradeHandler, IssueHandler, RegisterHandler, ReturnHandler};
use crate::metrics::{
    record_message_failed, record_message_received, record_message_rejected,
    record_mutation_applied,
};
use async_trait::async_trait;
use depot_core::bus::BusMessage;
use depot_core::store::{InventoryStore, StoreError};
use std::sync::Arc;
use tracing::{error, warn};

/// Maps configured topic names to event kinds.
///
/// Topic names come from configuration rather than being hardcoded, so a
/// deployment can rename a topic without touching the decoder.
#[derive(Debug, Clone)]
pub struct TopicMap {
    device_new: String,
    assignment_issue: String,
    assignment_return: String,
    grades_new: String,
}

impl TopicMap {
    /// Build the map from the configured topic names.
    #[must_use]
    pub fn new(topics: &TopicConfig) -> Self {
        Self {
            device_new: topics.device_new.clone(),
            assignment_issue: topics.assignment_issue.clone(),
            assignment_return: topics.assignment_return.clone(),
            grades_new: topics.grades_new.clone(),
        }
    }

    /// Resolve a topic name to its event kind, if one is mapped.
    #[must_use]
    pub fn kind(&self, topic: &str) -> Option<EventKind> {
        if topic == self.device_new {
            Some(EventKind::DeviceNew)
        } else if topic == self.assignment_issue {
            Some(EventKind::AssignmentIssue)
        } else if topic == self.assignment_return {
            Some(EventKind::AssignmentReturn)
        } else if topic == self.grades_new {
            Some(EventKind::GradeNew)
        } else {
            None
        }
    }

    /// Decode a raw payload according to its topic.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownTopic`] when the topic is not mapped
    /// and [`DecodeError::Malformed`] when the payload does not match the
    /// wire schema for the topic's event kind.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<DecodedEvent, DecodeError> {
        let kind = self.kind(topic).ok_or_else(|| DecodeError::UnknownTopic {
            topic: topic.to_owned(),
        })?;
        decode::decode(kind, payload)
    }
}

/// Routes decoded events to the four mutation handlers.
pub struct Dispatcher {
    topics: TopicMap,
    register: RegisterHandler,
    issue: IssueHandler,
    returns: ReturnHandler,
    grade: GradeHandler,
}

impl Dispatcher {
    /// Create a dispatcher over a shared store.
    #[must_use]
    pub fn new(topics: TopicMap, store: Arc<dyn InventoryStore>) -> Self {
        Self {
            topics,
            register: RegisterHandler::new(Arc::clone(&store)),
            issue: IssueHandler::new(Arc::clone(&store)),
            returns: ReturnHandler::new(Arc::clone(&store)),
            grade: GradeHandler::new(store),
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, message: &BusMessage) {
        record_message_received(&message.topic);

        let event = match self.topics.decode(&message.topic, &message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    error = %e,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "message dropped: undecodable"
                );
                record_message_rejected(&message.topic);
                return;
            }
        };

        let outcome = match event {
            DecodedEvent::DeviceNew(event) => self.register.handle(event).await,
            DecodedEvent::AssignmentIssue(event) => self.issue.handle(event).await,
            DecodedEvent::AssignmentReturn(event) => self.returns.handle(event).await,
            DecodedEvent::GradeNew(event) => self.grade.handle(event).await,
        };

        match outcome {
            Ok(()) => record_mutation_applied(&message.topic),
            Err(StoreError::Rejected(rejection)) => {
                warn!(
                    topic = %message.topic,
                    reason = %rejection,
                    "message dropped: rejected"
                );
                record_message_rejected(&message.topic);
            }
            Err(e) => {
                error!(
                    topic = %message.topic,
                    error = %e,
                    "message dropped: store failure"
                );
                record_message_failed(&message.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

    use super::*;
    use chrono::NaiveDate;
    use depot_testing::{payloads, InMemoryStore};

    fn default_topics() -> TopicConfig {
        TopicConfig {
            device_new: "device/new".to_string(),
            assignment_issue: "assignment/issue".to_string(),
            assignment_return: "assignment/return".to_string(),
            grades_new: "grades/new".to_string(),
        }
    }

    /// Store with one device type, one location and one person, ids all 1.
    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.add_device_type("Laptop").await;
        store.add_location("Room 101").await;
        store.add_person("Ada Lovelace").await;
        store
    }

    fn dispatcher_over(store: &Arc<InMemoryStore>) -> Dispatcher {
        let shared: Arc<dyn InventoryStore> = store.clone();
        Dispatcher::new(TopicMap::new(&default_topics()), shared)
    }

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).expect("valid date")
    }

    #[test]
    fn topic_map_resolves_all_four_kinds() {
        let map = TopicMap::new(&default_topics());
        assert_eq!(map.kind("device/new"), Some(EventKind::DeviceNew));
        assert_eq!(map.kind("assignment/issue"), Some(EventKind::AssignmentIssue));
        assert_eq!(map.kind("assignment/return"), Some(EventKind::AssignmentReturn));
        assert_eq!(map.kind("grades/new"), Some(EventKind::GradeNew));
        assert_eq!(map.kind("orders/new"), None);
    }

    #[tokio::test]
    async fn device_new_message_registers_a_device() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);

        let message = BusMessage::new("device/new", payloads::device_new(101, "Laptop", 1, None));
        dispatcher.handle(&message).await;

        let device = store.device(101).await.expect("lookup succeeds");
        assert!(device.is_some(), "device 101 should be registered");
    }

    #[tokio::test]
    async fn unknown_topic_leaves_state_untouched() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);

        let message = BusMessage::new("orders/new", payloads::device_new(101, "Laptop", 1, None));
        dispatcher.handle(&message).await;

        let device = store.device(101).await.expect("lookup succeeds");
        assert!(device.is_none(), "unmapped topic must not mutate state");
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);

        let message = BusMessage::new("device/new", b"{not json".to_vec());
        dispatcher.handle(&message).await;

        let device = store.device(101).await.expect("lookup succeeds");
        assert!(device.is_none());
    }

    #[tokio::test]
    async fn second_issue_is_rejected_and_first_loan_survives() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);

        let register = BusMessage::new("device/new", payloads::device_new(101, "Laptop", 1, None));
        dispatcher.handle(&register).await;

        let issue = BusMessage::new(
            "assignment/issue",
            payloads::assignment_issue(101, 1, "Ada Lovelace", march(1)),
        );
        dispatcher.handle(&issue).await;
        dispatcher.handle(&issue).await;

        let open = store
            .open_assignment(101)
            .await
            .expect("lookup succeeds")
            .expect("loan stays open");
        assert_eq!(open.issued_at, march(1));

        let history = store.assignments(101).await.expect("lookup succeeds");
        assert_eq!(history.len(), 1, "rejected duplicate must not add a row");
    }

    #[tokio::test]
    async fn store_failure_is_absorbed() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);
        store.set_backend_failing(true);

        let message = BusMessage::new("device/new", payloads::device_new(101, "Laptop", 1, None));
        dispatcher.handle(&message).await;

        store.set_backend_failing(false);
        let device = store.device(101).await.expect("lookup succeeds");
        assert!(device.is_none(), "failed mutation must not be applied");
    }

    #[tokio::test]
    async fn renamed_topics_are_honoured() {
        let store = seeded_store().await;
        let topics = TopicConfig {
            device_new: "inventory.device.created".to_string(),
            assignment_issue: "inventory.loan.opened".to_string(),
            assignment_return: "inventory.loan.closed".to_string(),
            grades_new: "grades.recorded".to_string(),
        };
        let shared: Arc<dyn InventoryStore> = store.clone();
        let dispatcher = Dispatcher::new(TopicMap::new(&topics), shared);

        let payload = payloads::device_new(101, "Laptop", 1, None);
        dispatcher
            .handle(&BusMessage::new("inventory.device.created", payload.clone()))
            .await;
        dispatcher.handle(&BusMessage::new("device/new", payload)).await;

        let device = store.device(101).await.expect("lookup succeeds");
        assert!(device.is_some(), "renamed topic must route");

        let history = store.assignments(101).await.expect("lookup succeeds");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn grade_messages_append_without_deduplication() {
        let store = seeded_store().await;
        let dispatcher = dispatcher_over(&store);

        let message = BusMessage::new("grades/new", payloads::grade_new(7, 3, "A"));
        dispatcher.handle(&message).await;
        dispatcher.handle(&message).await;

        let grades = store.grades(7).await.expect("lookup succeeds");
        assert_eq!(grades.len(), 2, "grade ingestion keeps every delivery");
    }
}
