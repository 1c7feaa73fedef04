//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Count lines are entities owned by a session aggregate: a line keeps its
/// identity while its counted and reviewed quantities change.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
