//! # Depot Ingest
//!
//! Asynchronous ingestion pipeline that applies bus-delivered inventory and
//! grade events to the shared relational store.
//!
//! - [`config`]: environment-driven configuration
//! - [`consumer`]: subscribe-process-reconnect loop over the message bus
//! - [`decode`]: wire schemas and payload decoding
//! - [`dispatch`]: topic routing and per-message outcome handling
//! - [`handlers`]: one handler per mutation
//! - [`lifecycle`]: startup and graceful shutdown
//! - [`metrics`]: message life cycle counters
//!
//! Messages flow `consumer -> dispatch -> decode -> handlers -> store`, one
//! at a time and in delivery order. Anything that cannot be applied is
//! logged, counted and dropped; delivery is at-most-once end to end.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consumer;
pub mod decode;
pub mod dispatch;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;

// Re-export commonly used items
pub use config::Config;
pub use consumer::{EventConsumer, MessageHandler};
pub use dispatch::{Dispatcher, TopicMap};
pub use lifecycle::Application;
