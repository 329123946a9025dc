//! # Depot Testing
//!
//! In-memory test doubles for the depot ingestion pipeline.
//!
//! This crate provides:
//! - [`InMemoryBus`]: broadcast-backed message bus with transport failure injection
//! - [`InMemoryStore`]: inventory store with the same rejection rules and
//!   precedence as the PostgreSQL store
//! - [`payloads`]: builders for wire-format JSON payloads
//!
//! ## Example
//!
//! ```ignore
//! use depot_core::bus::MessageBus;
//! use depot_testing::{InMemoryBus, InMemoryStore, payloads};
//!
//! #[tokio::test]
//! async fn delivers_a_registration() {
//!     let bus = InMemoryBus::new();
//!     let store = InMemoryStore::new();
//!     store.add_device_type("Laptop").await;
//!     store.add_location("Room 101").await;
//!
//!     let mut stream = bus.subscribe(&["device/new"]).await.unwrap();
//!     bus.publish("device/new", &payloads::device_new(101, "Laptop", 1, None))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod bus;
pub mod payloads;
pub mod store;

// Re-export commonly used items
pub use bus::InMemoryBus;
pub use store::InMemoryStore;
