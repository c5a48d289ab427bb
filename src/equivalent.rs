//! Vendored [`equivalent`](https://crates.io/crates/equivalent) trait.

use std::borrow::Borrow;

/// Key equivalence trait.
///
/// Lookups take any `Q: Equivalent<K>`, e.g., `str` for `String` keys.
pub trait Equivalent<K: ?Sized> {
    /// Compares `self` to `key` and returns `true` if they are equal.
    fn equivalent(&self, key: &K) -> bool;
}

impl<Q: ?Sized, K: ?Sized> Equivalent<K> for Q
where
    Q: Eq,
    K: Borrow<Q>,
{
    #[inline]
    fn equivalent(&self, key: &K) -> bool {
        PartialEq::eq(self, key.borrow())
    }
}
