//! Domain events and their distribution mechanics.
//!
//! Count sessions are event-sourced: every accepted action is recorded as an
//! immutable event, appended to the session's stream, then fanned out to
//! read-model consumers through an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
