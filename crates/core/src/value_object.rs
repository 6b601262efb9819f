//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
/// `Money` and attribute sets are value objects; orders and products are not.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
