//! SSA identifiers and id-keyed containers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU32;

/// A SPIR-V result id: a 32-bit non-zero unsigned integer.
///
/// Ids are dense small integers allocated by the module (`max_id + 1`);
/// zero is reserved by the binary format for "no id".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(NonZeroU32);

impl Id {
    /// Creates an id from a raw word, rejecting zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Returns the raw 32-bit value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The id following this one in allocation order.
    pub fn next(self) -> Id {
        Id(NonZeroU32::new(self.0.get() + 1).expect("id space exhausted"))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An ordered map keyed by [`Id`].
///
/// Iteration order is ascending id order, which is also the order the
/// module emitter uses for globals.
pub type IdMap<T> = BTreeMap<Id, T>;

/// An ordered set of [`Id`]s.
pub type IdSet = BTreeSet<Id>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_rejects_zero() {
        assert!(Id::new(0).is_none());
        assert!(Id::new(1).is_some());
    }

    #[test]
    fn id_ordering() {
        let a = Id::new(3).unwrap();
        let b = Id::new(7).unwrap();
        assert!(a < b);
        assert_eq!(a, Id::new(3).unwrap());
    }

    #[test]
    fn id_next() {
        let a = Id::new(41).unwrap();
        assert_eq!(a.next().get(), 42);
    }

    #[test]
    fn id_display() {
        let a = Id::new(12).unwrap();
        assert_eq!(format!("{a}"), "%12");
        assert_eq!(format!("{a:?}"), "%12");
    }

    #[test]
    fn id_map_iterates_in_id_order() {
        let mut map = IdMap::new();
        map.insert(Id::new(9).unwrap(), "c");
        map.insert(Id::new(1).unwrap(), "a");
        map.insert(Id::new(4).unwrap(), "b");
        let order: Vec<_> = map.keys().map(|id| id.get()).collect();
        assert_eq!(order, vec![1, 4, 9]);
    }
}
