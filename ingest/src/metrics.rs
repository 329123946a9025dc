//! Pipeline counters.
//!
//! Four counters, each labeled by topic, cover the whole message life
//! cycle: received, applied, rejected (decode failure or business rule),
//! failed (store fault). Dropped messages are visible only here and in the
//! logs; there is no dead-letter queue to inspect.

/// Register counter descriptions with the installed metrics recorder.
///
/// Call once at startup, before the first message is processed.
pub fn register_pipeline_metrics() {
    metrics::describe_counter!(
        "depot_messages_received_total",
        "Messages delivered by the bus, by topic"
    );
    metrics::describe_counter!(
        "depot_mutations_applied_total",
        "Messages that resulted in a state mutation, by topic"
    );
    metrics::describe_counter!(
        "depot_messages_rejected_total",
        "Messages dropped by decode failure or business rejection, by topic"
    );
    metrics::describe_counter!(
        "depot_messages_failed_total",
        "Messages dropped by a store fault, by topic"
    );

    tracing::info!("pipeline metrics registered");
}

/// Record a message delivered by the bus.
pub fn record_message_received(topic: &str) {
    metrics::counter!("depot_messages_received_total", "topic" => topic.to_owned()).increment(1);
}

/// Record a successfully applied mutation.
pub fn record_mutation_applied(topic: &str) {
    metrics::counter!("depot_mutations_applied_total", "topic" => topic.to_owned()).increment(1);
}

/// Record a message dropped by decode failure or business rejection.
pub fn record_message_rejected(topic: &str) {
    metrics::counter!("depot_messages_rejected_total", "topic" => topic.to_owned()).increment(1);
}

/// Record a message dropped by a store fault.
pub fn record_message_failed(topic: &str) {
    metrics::counter!("depot_messages_failed_total", "topic" => topic.to_owned()).increment(1);
}
