//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Order lines and product variants are entities owned by a larger record;
/// they keep their identity while their quantities and prices move.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
