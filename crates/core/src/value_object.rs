//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// A value object has no identity of its own; two instances with the same
/// attributes are interchangeable. A count scope (warehouse, location filter,
/// stock filter policy) is a value object: replacing it means building a new
/// one, never editing one in place.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
