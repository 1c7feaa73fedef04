//! Port adapters.
//!
//! Only in-memory adapters ship here; hosts plug their own inventory, costing,
//! tasking and messaging systems in behind the `stockcount_counting::ports`
//! traits.

pub mod in_memory;

pub use in_memory::{
    AssignedTask, AuditMessage, InMemoryAuditTrail, InMemoryInventory, RecordingTaskAssigner,
    SequenceNameGenerator,
};
