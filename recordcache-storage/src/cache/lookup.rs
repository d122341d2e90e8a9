//! Outcome of a typed cache read.

/// Result of looking up one entity in the cache.
///
/// Negative caching is a variant of the value, not a second cache, so a
/// read is always a single three-way branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    /// The entity is cached.
    Hit(T),
    /// The store recently confirmed there is no such entity.
    Negative,
    /// Nothing is cached (never written, expired or evicted).
    Absent,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}
