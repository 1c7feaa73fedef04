//! Append-only event store boundary.
//!
//! Storage-agnostic abstraction for tenant-scoped event streams. Each count
//! session is one stream keyed by `(tenant_id, session stream id)`.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
