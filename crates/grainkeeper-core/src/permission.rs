//! Permission sets.
//!
//! A [`PermissionSet`] is a vector of booleans indexed by the permissions an
//! app declares in its [`ViewInfo`](crate::ViewInfo). Indices beyond the
//! stored vector are treated as `false`. Permissions are independent: an app
//! may hand out "write" without "read". Roles are only aliases for sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fixed-length set of permission bits.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(Vec<bool>);

impl PermissionSet {
    /// Wrap an explicit bit vector.
    pub fn new(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// The all-true set of length `len`.
    pub fn all(len: usize) -> Self {
        Self(vec![true; len])
    }

    /// The all-false set of length `len`.
    pub fn none(len: usize) -> Self {
        Self(vec![false; len])
    }

    /// Number of stored bits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no permission is held, regardless of length.
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&b| b)
    }

    /// Whether permission `index` is held.
    pub fn get(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Set permission `index`, growing the vector if needed.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.0.len() {
            if !value {
                return;
            }
            self.0.resize(index + 1, false);
        }
        self.0[index] = value;
    }

    /// Copy of this set truncated or padded with `false` to exactly `len` bits.
    pub fn resized(&self, len: usize) -> Self {
        let mut bits = self.0.clone();
        bits.resize(len, false);
        Self(bits)
    }

    /// Indices of held permissions, ascending.
    pub fn granted(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| if b { Some(i) } else { None })
    }

    /// Borrow the raw bits.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Union `other` into `self`. Returns whether anything changed.
    pub fn add(&mut self, other: &PermissionSet) -> bool {
        let mut changed = false;
        for index in other.granted() {
            if !self.get(index) {
                self.set(index, true);
                changed = true;
            }
        }
        changed
    }

    /// Subtract `other` from `self`. Returns whether anything changed.
    pub fn remove(&mut self, other: &PermissionSet) -> bool {
        let mut changed = false;
        for (index, bit) in self.0.iter_mut().enumerate() {
            if *bit && other.get(index) {
                *bit = false;
                changed = true;
            }
        }
        changed
    }

    /// Intersect `self` with `other`. Returns whether anything changed.
    pub fn intersect(&mut self, other: &PermissionSet) -> bool {
        let mut changed = false;
        for (index, bit) in self.0.iter_mut().enumerate() {
            if *bit && !other.get(index) {
                *bit = false;
                changed = true;
            }
        }
        changed
    }

    /// Whether every permission held here is also held by `other`.
    pub fn is_subset_of(&self, other: &PermissionSet) -> bool {
        self.granted().all(|index| other.get(index))
    }
}

impl fmt::Debug for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PermissionSet[")?;
        for &bit in &self.0 {
            f.write_str(if bit { "T" } else { "F" })?;
        }
        f.write_str("]")
    }
}

impl From<Vec<bool>> for PermissionSet {
    fn from(bits: Vec<bool>) -> Self {
        Self(bits)
    }
}

impl<const N: usize> From<[bool; N]> for PermissionSet {
    fn from(bits: [bool; N]) -> Self {
        Self(bits.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_out_of_range_is_false() {
        let set = PermissionSet::from([true]);
        assert!(set.get(0));
        assert!(!set.get(5));
    }

    #[test]
    fn test_add_reports_change() {
        let mut set = PermissionSet::from([true, false]);
        assert!(set.add(&PermissionSet::from([false, true, true])));
        assert_eq!(set, PermissionSet::from([true, true, true]));
        assert!(!set.add(&PermissionSet::from([true])));
    }

    #[test]
    fn test_remove_and_intersect() {
        let mut set = PermissionSet::all(3);
        assert!(set.remove(&PermissionSet::from([false, true])));
        assert_eq!(set, PermissionSet::from([true, false, true]));

        // Bits beyond the other set's length are dropped by intersect.
        assert!(set.intersect(&PermissionSet::from([true])));
        assert_eq!(set, PermissionSet::from([true, false, false]));
    }

    #[test]
    fn test_is_empty_ignores_length() {
        assert!(PermissionSet::none(4).is_empty());
        assert!(PermissionSet::default().is_empty());
        assert!(!PermissionSet::from([false, true]).is_empty());
    }

    #[test]
    fn test_resized() {
        let set = PermissionSet::from([true, true, true]);
        assert_eq!(set.resized(2), PermissionSet::from([true, true]));
        assert_eq!(set.resized(4), PermissionSet::from([true, true, true, false]));
    }

    proptest! {
        #[test]
        fn add_is_monotone(a in prop::collection::vec(any::<bool>(), 0..8),
                           b in prop::collection::vec(any::<bool>(), 0..8)) {
            let before = PermissionSet::new(a);
            let mut after = before.clone();
            after.add(&PermissionSet::new(b.clone()));
            prop_assert!(before.is_subset_of(&after));
            prop_assert!(PermissionSet::new(b).is_subset_of(&after));
        }

        #[test]
        fn intersect_is_subset_of_both(a in prop::collection::vec(any::<bool>(), 0..8),
                                       b in prop::collection::vec(any::<bool>(), 0..8)) {
            let mut set = PermissionSet::new(a.clone());
            set.intersect(&PermissionSet::new(b.clone()));
            prop_assert!(set.is_subset_of(&PermissionSet::new(a)));
            prop_assert!(set.is_subset_of(&PermissionSet::new(b)));
        }
    }
}
