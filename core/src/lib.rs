//! # Depot Core
//!
//! Domain types and service traits for the depot ingestion pipeline.
//!
//! This crate defines the contracts the rest of the workspace implements:
//!
//! - **Inventory entities** ([`inventory`]): devices, people, locations,
//!   loan assignments, and grades, as persisted by both mutation paths.
//! - **Message bus** ([`bus`]): the [`bus::MessageBus`] trait delivering raw
//!   (topic, payload) pairs with at-most-once semantics.
//! - **Inventory store** ([`store`]): the [`store::InventoryStore`] trait
//!   through which every mutation flows, so the event pipeline and the
//!   synchronous request path enforce identical business rules.
//!
//! No I/O lives here; concrete transports and stores are provided by the
//! `depot-redpanda` and `depot-postgres` crates, with in-memory doubles in
//! `depot-testing`.

pub mod bus;
pub mod inventory;
pub mod store;

pub use bus::{BusError, BusMessage, MessageBus, MessageStream};
pub use inventory::{
    Assignment, Device, DeviceType, Grade, IssueRequest, Location, NewDevice, NewGrade, Person,
    ReturnRequest,
};
pub use store::{InventoryStore, Rejection, StoreError, StoreResult};
