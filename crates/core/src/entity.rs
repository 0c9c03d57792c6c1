//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Models keep their id while accuracy/confidence evolve; predictions keep
/// theirs while their accuracy is stamped.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
